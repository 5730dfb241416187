use crate::models::Event;
use chrono::NaiveDate;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Best-effort JSONL archive of every event, one file per local day.
/// The store is authoritative; a failure here is logged to stderr and
/// never reaches the save path.
pub struct EventLogger {
    inner: Mutex<LoggerInner>,
}

struct LoggerInner {
    dir: PathBuf,
    max_bytes: u64,
    compress: bool,
    current: Option<ActiveFile>,
}

struct ActiveFile {
    date: NaiveDate,
    path: PathBuf,
    writer: BufWriter<File>,
    bytes: u64,
}

impl EventLogger {
    pub fn open(dir: &str, max_bytes: u64, compress: bool) -> std::io::Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(EventLogger {
            inner: Mutex::new(LoggerInner {
                dir: PathBuf::from(dir),
                max_bytes,
                compress,
                current: None,
            }),
        })
    }

    /// Append one JSON line for the event. Never propagates failure.
    pub fn log(&self, event: &Event) {
        self.log_on_date(event, chrono::Local::now().date_naive());
    }

    pub(crate) fn log_on_date(&self, event: &Event, today: NaiveDate) {
        let line = archive_line(event);
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = inner.write_line(&line, today) {
            eprintln!("⚠️ Event archive write failed: {e}");
        }
    }

    /// Unlink archive files older than the retention horizon. Returns the
    /// number of files removed.
    pub fn clean_old_files(&self, retention_days: i64) -> usize {
        let (dir, today) = {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            (inner.dir.clone(), chrono::Local::now().date_naive())
        };
        let cutoff = today - chrono::Duration::days(retention_days);
        let mut removed = 0;
        let entries = match fs::read_dir(&dir) {
            Ok(e) => e,
            Err(_) => return 0,
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(date) = file_date(&name)
                && date < cutoff
                && fs::remove_file(entry.path()).is_ok()
            {
                removed += 1;
            }
        }
        if removed > 0 {
            eprintln!("🧹 Event archive: removed {removed} files past retention");
        }
        removed
    }

    /// Flush buffered writes. Called at shutdown.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(ref mut active) = inner.current {
            active.writer.flush().ok();
        }
    }
}

impl LoggerInner {
    fn write_line(&mut self, line: &str, today: NaiveDate) -> std::io::Result<()> {
        self.rotate_if_needed(today, line.len() as u64 + 1)?;
        let active = match self.current.as_mut() {
            Some(a) => a,
            // rotate_if_needed always leaves a current file on success
            None => return Ok(()),
        };
        active.writer.write_all(line.as_bytes())?;
        active.writer.write_all(b"\n")?;
        active.writer.flush()?;
        active.bytes += line.len() as u64 + 1;
        Ok(())
    }

    fn rotate_if_needed(&mut self, today: NaiveDate, incoming: u64) -> std::io::Result<()> {
        let needs_new = match self.current {
            None => true,
            Some(ref a) => a.date != today || a.bytes + incoming > self.max_bytes,
        };
        if !needs_new {
            return Ok(());
        }

        if let Some(active) = self.current.take() {
            self.finalize(active, today)?;
        }

        let path = self.dir.join(format!("events-{today}.log"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let bytes = file.metadata().map(|m| m.len()).unwrap_or(0);
        self.current = Some(ActiveFile {
            date: today,
            path,
            writer: BufWriter::new(file),
            bytes,
        });
        Ok(())
    }

    /// Close out a finished file: size-rotated files get a numeric suffix so
    /// the day's primary name stays free, and finished files are optionally
    /// gzipped off the hot path.
    fn finalize(&mut self, mut active: ActiveFile, today: NaiveDate) -> std::io::Result<()> {
        active.writer.flush()?;
        drop(active.writer);

        let final_path = if active.date == today {
            let rotated = next_rotation_path(&self.dir, active.date);
            fs::rename(&active.path, &rotated)?;
            rotated
        } else {
            active.path
        };

        if self.compress {
            std::thread::spawn(move || {
                if let Err(e) = gzip_file(&final_path) {
                    eprintln!("⚠️ Event archive gzip failed for {}: {e}", final_path.display());
                }
            });
        }
        Ok(())
    }
}

/// One archive line, keys fixed by the log file format.
fn archive_line(event: &Event) -> String {
    let (capability, attribute) = event.capability_attribute();
    let line = serde_json::json!({
        "eventId": event.id,
        "eventType": event.kind,
        "eventSource": event.source,
        "deviceId": event.device_id,
        "deviceName": event.device_name,
        "locationId": event.location_id,
        "capability": capability,
        "attribute": attribute,
        "value": event.value,
        "eventTimestamp": chrono::DateTime::from_timestamp_millis(event.timestamp)
            .map(|t| t.to_rfc3339()),
        "loggedAt": chrono::Utc::now().to_rfc3339(),
        "metadata": event.metadata,
    });
    line.to_string()
}

/// Parse the date out of `events-YYYY-MM-DD[.n].log[.gz]`.
fn file_date(name: &str) -> Option<NaiveDate> {
    let rest = name.strip_prefix("events-")?;
    NaiveDate::parse_from_str(rest.get(..10)?, "%Y-%m-%d").ok()
}

fn next_rotation_path(dir: &Path, date: NaiveDate) -> PathBuf {
    for n in 1.. {
        let candidate = dir.join(format!("events-{date}.{n}.log"));
        let gz = dir.join(format!("events-{date}.{n}.log.gz"));
        if !candidate.exists() && !gz.exists() {
            return candidate;
        }
    }
    unreachable!()
}

fn gzip_file(path: &Path) -> std::io::Result<()> {
    let mut input = File::open(path)?;
    let gz_path = PathBuf::from(format!("{}.gz", path.display()));
    let out = File::create(&gz_path)?;
    let mut encoder = flate2::write::GzEncoder::new(out, flate2::Compression::default());
    std::io::copy(&mut input, &mut encoder)?;
    encoder.finish()?;
    fs::remove_file(path)?;
    Ok(())
}
