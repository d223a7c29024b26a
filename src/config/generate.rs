pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# SPOTWATCH CONFIGURATION
# =============================================================================
# Spotwatch tails a detection log written by a camera/model process, parses
# each new "<timestamp>,<latitude>,<longitude>" line, suppresses repeats of
# the same location inside a cooldown window and stores the rest.
#
# Every setting is optional; omitted values fall back to the defaults shown.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/spotwatch/config.yml
#   3. /etc/spotwatch/config.yml
#
# $env{VAR} is replaced with the value of the environment variable VAR.

# =============================================================================
# SOURCE
# =============================================================================
source:
  # Detection log to tail. Created empty if missing; only lines appended after
  # startup are ingested.
  path: ./detections.txt

  # How often to check the file for new bytes.
  poll_interval: 10ms

  # A trailing line without a newline is treated as complete once the file
  # has been quiet for this long.
  flush_quiet_period: 300ms

# =============================================================================
# DEDUP
# =============================================================================
dedup:
  # Detections at the same rounded coordinates are stored at most once per
  # cooldown window.
  cooldown: 5m

  # Decimal places kept when rounding coordinates into the dedup key.
  precision: 6

  # Periodically forget keys whose cooldown has expired. 'infinite' keeps
  # every key until the process exits.
  sweep_interval: infinite

# =============================================================================
# STORAGE
# =============================================================================
storage:
  # DuckDB database receiving accepted detections.
  path: ./detections.duckdb
"#
    .to_string()
}
