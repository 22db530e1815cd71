// ==== Deduplication metrics ====
/// Counter for candidates accepted by a sequencer
pub const CANDIDATES_TOTAL_COUNTER: &str = "rowtime_dedup_candidates_total";

/// Counter for deduplication decisions, labelled by outcome
pub const DEDUPLICATION_OUTCOME_COUNTER: &str = "rowtime_dedup_outcome_total";

/// Counter for changelog records handed to the sink, labelled by kind
pub const CHANGELOG_RECORDS_EMITTED_COUNTER: &str = "rowtime_dedup_changelog_records_total";

/// Counter for candidates skipped because they carry no usable event time
pub const MALFORMED_RECORDS_COUNTER: &str = "rowtime_dedup_malformed_records_total";

// ==== State access metrics ====
/// Histogram for the time between issuing a read and applying its result
pub const STATE_READ_DURATION_HISTOGRAM: &str = "rowtime_dedup_state_read_duration_ms";

/// Counter for failed state operations, labelled by operation
pub const STATE_ACCESS_ERRORS_COUNTER: &str = "rowtime_dedup_state_access_errors_total";

/// Gauge for writes issued but not yet completed
pub const WRITES_IN_FLIGHT_GAUGE: &str = "rowtime_dedup_writes_in_flight";

// ==== Sequencing metrics ====
/// Gauge for candidates parked behind an earlier candidate of the same key
pub const PARKED_CANDIDATES_GAUGE: &str = "rowtime_dedup_parked_candidates";

/// Gauge for keys with a candidate currently being processed
pub const ACTIVE_KEYS_GAUGE: &str = "rowtime_dedup_active_keys";

/// Counter for times a partition worker stopped pulling input because too
/// many keys were active
pub const WORKER_BACKPRESSURE_COUNTER: &str = "rowtime_dedup_worker_backpressure_total";

// ==== Runtime metrics ====
/// Counter for input lines the replay binary could not parse
pub const INPUT_PARSE_ERRORS_COUNTER: &str = "rowtime_dedup_input_parse_errors_total";
