//! Global Logger Module
//!
//! Leveled, source-tagged log records persisted to a SQLite database. Records
//! are handed to a background thread over a channel and written in batches.
//! Until [`init`] succeeds, warn and error records go to stderr.

use once_cell::sync::OnceCell;
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, RwLock};
use std::time::{Duration, Instant};

static DB_PATH: OnceCell<PathBuf> = OnceCell::new();

const BATCH_SIZE: usize = 100;
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
struct LogMessage {
    timestamp: i64,
    level: LogLevel,
    source: String,
    message: String,
    metadata: Option<String>,
}

static LOG_SENDER: RwLock<Option<mpsc::Sender<LogMessage>>> = RwLock::new(None);

// ============================================
// Log Level & Entry Types
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

// ============================================
// Database Functions
// ============================================

fn open_conn() -> Result<Connection, String> {
    let path = DB_PATH
        .get()
        .ok_or_else(|| "Logger not initialized".to_string())?;
    Connection::open(path).map_err(|e| format!("Failed to open log database: {}", e))
}

fn create_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS global_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp INTEGER NOT NULL,
            level TEXT NOT NULL,
            source TEXT NOT NULL,
            message TEXT NOT NULL,
            metadata TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_global_logs_timestamp ON global_logs(timestamp DESC)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_global_logs_level ON global_logs(level)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_global_logs_source ON global_logs(source)",
        [],
    )?;
    Ok(())
}

/// Open (or create) the log database and start the batch writer.
///
/// Only the first successful call takes effect.
pub fn init(path: &Path) -> Result<(), String> {
    DB_PATH
        .get_or_try_init(|| {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| format!("Failed to create log directory: {}", e))?;
            }
            let conn = Connection::open(path)
                .map_err(|e| format!("Failed to open log database: {}", e))?;
            create_schema(&conn).map_err(|e| format!("Failed to create log tables: {}", e))?;
            spawn_batch_writer();
            Ok::<_, String>(path.to_path_buf())
        })
        .map(|_| ())
}

fn spawn_batch_writer() {
    let (tx, rx) = mpsc::channel::<LogMessage>();

    if let Ok(mut sender) = LOG_SENDER.write() {
        *sender = Some(tx);
    }

    std::thread::spawn(move || {
        let mut buffer = Vec::with_capacity(BATCH_SIZE);
        let mut last_flush = Instant::now();

        loop {
            let timeout = FLUSH_INTERVAL
                .checked_sub(last_flush.elapsed())
                .unwrap_or_else(|| Duration::from_secs(0));

            match rx.recv_timeout(timeout) {
                Ok(msg) => {
                    buffer.push(msg);
                    if buffer.len() >= BATCH_SIZE || last_flush.elapsed() >= FLUSH_INTERVAL {
                        flush_logs(&mut buffer);
                        last_flush = Instant::now();
                    }
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if !buffer.is_empty() {
                        flush_logs(&mut buffer);
                    }
                    last_flush = Instant::now();
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    break;
                }
            }
        }

        if !buffer.is_empty() {
            flush_logs(&mut buffer);
        }
    });
}

fn write_stderr(msg: &LogMessage) {
    if msg.level >= LogLevel::Warn {
        eprintln!("[{}] {}: {}", msg.level.as_str(), msg.source, msg.message);
    }
}

fn flush_logs(buffer: &mut Vec<LogMessage>) {
    if buffer.is_empty() {
        return;
    }

    let written = open_conn().and_then(|mut conn| {
        let tx = conn.transaction().map_err(|e| e.to_string())?;
        for msg in buffer.iter() {
            let _ = tx.execute(
                "INSERT INTO global_logs (timestamp, level, source, message, metadata) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![msg.timestamp, msg.level.as_str(), msg.source, msg.message, msg.metadata],
            );
        }
        tx.commit().map_err(|e| e.to_string())
    });

    if let Err(e) = written {
        eprintln!("[error] logger: {}", e);
        buffer.iter().for_each(write_stderr);
    }
    buffer.clear();
}

// ============================================
// Global Log Functions
// ============================================

fn log_internal(level: LogLevel, source: &str, message: &str, metadata: Option<&str>) {
    let msg = LogMessage {
        timestamp: chrono::Utc::now().timestamp(),
        level,
        source: source.to_string(),
        message: message.to_string(),
        metadata: metadata.map(|s| s.to_string()),
    };

    let sent = match LOG_SENDER.read() {
        Ok(guard) => match guard.as_ref() {
            Some(sender) => sender.send(msg.clone()).is_ok(),
            None => false,
        },
        Err(_) => false,
    };

    if !sent {
        write_stderr(&msg);
    }
}

pub fn debug(source: &str, message: &str) {
    log_internal(LogLevel::Debug, source, message, None);
}

pub fn info(source: &str, message: &str) {
    log_internal(LogLevel::Info, source, message, None);
}

pub fn warn(source: &str, message: &str) {
    log_internal(LogLevel::Warn, source, message, None);
}

pub fn error(source: &str, message: &str) {
    log_internal(LogLevel::Error, source, message, None);
}

/// Log with a JSON metadata string attached
pub fn log_with_metadata(level: LogLevel, source: &str, message: &str, metadata: Option<&str>) {
    log_internal(level, source, message, metadata);
}

/// Shared test database; every test in the crate that touches the log store
/// goes through this so `init` runs once per process.
#[cfg(test)]
pub(crate) fn init_for_tests() {
    static DIR: once_cell::sync::Lazy<tempfile::TempDir> =
        once_cell::sync::Lazy::new(|| tempfile::tempdir().expect("temp dir"));
    init(&DIR.path().join("logs.db")).expect("logger init");
}

/// Stored records for `source`, oldest first, read straight from the database.
#[cfg(test)]
pub(crate) fn records_for(source: &str) -> Vec<(LogLevel, String, Option<String>)> {
    let Ok(conn) = open_conn() else {
        return Vec::new();
    };
    let Ok(mut stmt) = conn.prepare(
        "SELECT level, message, metadata FROM global_logs WHERE source = ?1 ORDER BY id",
    ) else {
        return Vec::new();
    };
    stmt.query_map(params![source], |row| {
        let level: String = row.get(0)?;
        Ok((
            LogLevel::parse(&level).unwrap_or(LogLevel::Info),
            row.get(1)?,
            row.get(2)?,
        ))
    })
    .map(|rows| rows.filter_map(|r| r.ok()).collect())
    .unwrap_or_default()
}

/// Poll until `source` has at least `n` records or the deadline passes.
#[cfg(test)]
pub(crate) async fn wait_for_records(source: &str, n: usize) -> usize {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let count = records_for(source).len();
        if count >= n || Instant::now() > deadline {
            return count;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
