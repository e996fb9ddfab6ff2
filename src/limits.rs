/// Longest accepted course code, in bytes.
pub const MAX_COURSE_CODE_LEN: usize = 64;

/// Longest accepted "booked by" name, in bytes.
pub const MAX_BOOKED_BY_LEN: usize = 128;

/// Longest accepted free-text note, in bytes.
pub const MAX_NOTES_LEN: usize = 1024;

/// Longest accepted user id, in bytes.
pub const MAX_USER_ID_LEN: usize = 128;

/// Longest accepted document id. Derived ids are far below this.
pub const MAX_DOC_ID_LEN: usize = 256;

/// How many times a contended transaction is re-run before giving up.
pub const MAX_TRANSACTION_ATTEMPTS: usize = 5;

/// Per-partition watch channel depth. A watcher that falls further behind
/// than this resyncs from a fresh query.
pub const WATCH_CHANNEL_CAPACITY: usize = 256;

/// Depth of the channel feeding the WAL writer task.
pub const WAL_CHANNEL_CAPACITY: usize = 4096;

/// Largest WAL frame payload. Replay treats a longer length prefix as a
/// corrupt tail instead of allocating for it.
pub const MAX_WAL_FRAME_LEN: usize = 1 << 20;
