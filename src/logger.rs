//! Session logger: writes all log output to a single file in the OS data directory.
//!
//! The file is **truncated at each launch**, so it only ever contains output
//! from the most recent session.
//!
//! Log location:
//!   Windows:  `%APPDATA%\StageCanvas\stagecanvas.log`
//!   Linux:    `~/.local/share/StageCanvas/stagecanvas.log`
//!   macOS:    `~/Library/Application Support/StageCanvas/stagecanvas.log`
//!
//! Use the `log_info!` / `log_warn!` / `log_err!` macros anywhere in the crate,
//! and `log_event!` for events that carry ids (jobs, zoom sources, rows).
//! Before `init()` runs (unit tests, headless mode) every call is a no-op.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

static LOG_FILE: OnceLock<Mutex<File>> = OnceLock::new();
static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();

/// Returns the path to the current session log file.
pub fn log_path() -> Option<&'static PathBuf> {
    LOG_PATH.get()
}

/// Write a line to the session log. I/O errors are ignored so that logging
/// never takes the canvas down with it.
pub fn write_line(line: &str) {
    if let Some(mutex) = LOG_FILE.get()
        && let Ok(mut file) = mutex.lock()
    {
        let _ = writeln!(file, "{}", line);
    }
}

/// Write a timestamped, level-tagged line to the session log.
pub fn write(level: &str, msg: &str) {
    let ts = timestamp();
    write_line(&format!("[{}] [{}] {}", ts, level, msg));
}

/// Write an event name followed by `key=value` pairs. Used for canvas and
/// job events so a session can be grepped by field (`job=`, `source=`).
pub fn write_event(level: &str, event: &str, fields: &[(&str, &dyn fmt::Display)]) {
    write(level, &format_event(event, fields));
}

/// `event key=value key="value with spaces"`.
pub fn format_event(event: &str, fields: &[(&str, &dyn fmt::Display)]) -> String {
    let mut out = String::from(event);
    for (key, value) in fields {
        let value = value.to_string();
        if value.is_empty() || value.contains(char::is_whitespace) || value.contains('"') {
            out.push_str(&format!(" {}={:?}", key, value));
        } else {
            out.push_str(&format!(" {}={}", key, value));
        }
    }
    out
}

// The bodies are blocks so the macros also work as match-arm expressions.

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        $crate::logger::write("INFO", &format!($($arg)*));
    }};
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        $crate::logger::write("WARN", &format!($($arg)*));
    }};
}

#[macro_export]
macro_rules! log_err {
    ($($arg:tt)*) => {{
        $crate::logger::write("ERROR", &format!($($arg)*));
    }};
}

/// `log_event!("INFO", "generation.started", job = id, model = spec.model)`
#[macro_export]
macro_rules! log_event {
    ($level:expr, $event:expr $(, $key:ident = $value:expr)* $(,)?) => {{
        $crate::logger::write_event(
            $level,
            $event,
            &[$((stringify!($key), &$value as &dyn ::std::fmt::Display)),*],
        );
    }};
}

/// Initialise the session logger. Call once, before the window opens.
///
/// * Creates (or truncates) the log file.
/// * Installs a panic hook that writes the panic message to the log before
///   handing over to the default handler.
pub fn init() {
    let path = log_file_path();

    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&path);

    match file {
        Ok(f) => {
            let _ = LOG_PATH.set(path.clone());
            let _ = LOG_FILE.set(Mutex::new(f));
        }
        Err(e) => {
            eprintln!("[logger] Failed to open log file {:?}: {}", path, e);
            return;
        }
    }

    write_line(&format!(
        "=== StageCanvas session started (unix {}) ===",
        unix_seconds().unwrap_or(0)
    ));
    write_line(&format!("Log file: {}", path.display()));
    write_line("");

    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        write_line(&format!("[{}] [PANIC] {}", timestamp(), info));
        prev(info);
    }));
}

fn log_file_path() -> PathBuf {
    data_dir().join("StageCanvas").join("stagecanvas.log")
}

/// Platform data directory (without the app sub-folder).
pub(crate) fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata);
        }
    }
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support");
        }
    }
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    PathBuf::from(".")
}

fn unix_seconds() -> Option<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_secs())
}

/// HH:MM:SS (UTC) within the current day; good enough for a session log.
fn timestamp() -> String {
    match unix_seconds() {
        Some(secs) => {
            let h = (secs % 86400) / 3600;
            let m = (secs % 3600) / 60;
            let s = secs % 60;
            format!("{:02}:{:02}:{:02}", h, m, s)
        }
        None => "??:??:??".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_fields_are_key_value_pairs() {
        let job: &dyn fmt::Display = &7;
        let model: &dyn fmt::Display = &"edit-pro";
        let line = format_event("generation.started", &[("job", job), ("model", model)]);
        assert_eq!(line, "generation.started job=7 model=edit-pro");
    }

    #[test]
    fn values_with_spaces_are_quoted() {
        let error: &dyn fmt::Display = &"model overloaded";
        let user: &dyn fmt::Display = &"";
        let line = format_event("generation.failed", &[("error", error), ("user", user)]);
        assert_eq!(line, r#"generation.failed error="model overloaded" user="""#);
    }

    #[test]
    fn macros_are_usable_as_match_arms() {
        let outcome: Result<u32, &str> = Err("nope");
        match outcome {
            Ok(v) => log_event!("INFO", "value", v = v),
            Err(e) => log_warn!("failed: {}", e),
        }
    }
}
