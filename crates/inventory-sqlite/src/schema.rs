pub const MIG_0001_INIT: &str = r#"
BEGIN;

CREATE TABLE hosts (
  address           TEXT PRIMARY KEY,
  mac_address       TEXT NOT NULL DEFAULT '',
  vendor            TEXT NOT NULL DEFAULT '',
  hostname          TEXT NOT NULL DEFAULT '',
  ports             TEXT NOT NULL DEFAULT '',
  note              TEXT NOT NULL DEFAULT '',
  status            TEXT NOT NULL CHECK (status IN ('ONLINE','OFFLINE')),
  known_host        INTEGER NOT NULL DEFAULT 0 CHECK (known_host IN (0,1)),
  first_seen        INTEGER NOT NULL,
  last_seen_online  INTEGER NOT NULL
);

CREATE TABLE host_history (
  history_id        INTEGER PRIMARY KEY AUTOINCREMENT,
  address           TEXT NOT NULL,
  status            INTEGER NOT NULL CHECK (status IN (0,1)),
  event_time        INTEGER NOT NULL
);

CREATE TABLE runs (
  run_id            TEXT PRIMARY KEY,
  started_at        INTEGER NOT NULL,
  finished_at       INTEGER NOT NULL,
  port_scan         INTEGER NOT NULL CHECK (port_scan IN (0,1)),
  inserted          INTEGER NOT NULL DEFAULT 0,
  updated           INTEGER NOT NULL DEFAULT 0,
  marked_offline    INTEGER NOT NULL DEFAULT 0,
  port_scans        INTEGER NOT NULL DEFAULT 0,
  committed         INTEGER NOT NULL CHECK (committed IN (0,1))
);

CREATE INDEX idx_history_address ON host_history(address, event_time);
CREATE INDEX idx_history_time ON host_history(event_time);
CREATE INDEX idx_runs_started ON runs(started_at);

COMMIT;
"#
;
