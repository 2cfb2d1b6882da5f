use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const BACKSCAN_CHUNK: u64 = 4096;
/// Longest line kept; anything longer is dropped up to its newline.
const MAX_LINE_BYTES: usize = 64 * 1024;

/// Shared flag that ends a [`LineFollower`] at its next wake-up.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Follows a growing text file the way `tail -n 1 -f` does.
///
/// The first line yielded is the last line present when the file is first opened;
/// after that every appended line is yielded once, trimmed. A line without its
/// terminating newline is held back until the newline arrives. When the file is
/// missing the follower waits for it to appear, and when it shrinks below the
/// current read offset reading restarts from the beginning. Lines longer than
/// 64 KiB are discarded.
pub struct LineFollower {
    path: PathBuf,
    poll_interval: Duration,
    stop: StopSignal,
    reader: Option<BufReader<File>>,
    offset: u64,
    pending: Vec<u8>,
    discarding: bool,
}

impl LineFollower {
    pub fn open(path: impl AsRef<Path>, poll_interval: Duration, stop: StopSignal) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            poll_interval,
            stop,
            reader: None,
            offset: 0,
            pending: Vec::new(),
            discarding: false,
        }
    }

    fn ensure_open(&mut self) -> io::Result<bool> {
        if self.reader.is_some() {
            return Ok(true);
        }
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err),
        };
        let start = last_line_offset(&mut file)?;
        file.seek(SeekFrom::Start(start))?;
        tracing::debug!(path = %self.path.display(), offset = start, "following sample file");
        self.offset = start;
        self.reader = Some(BufReader::new(file));
        Ok(true)
    }

    fn rewind_if_truncated(&mut self) -> io::Result<()> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(());
        };
        let len = reader.get_ref().metadata()?.len();
        if len < self.offset {
            tracing::info!(path = %self.path.display(), "sample file truncated; reading from start");
            reader.seek(SeekFrom::Start(0))?;
            self.offset = 0;
            self.pending.clear();
            self.discarding = false;
        }
        Ok(())
    }

    fn read_available_line(&mut self) -> io::Result<Option<String>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        loop {
            let room = (MAX_LINE_BYTES - self.pending.len()) as u64;
            let mut chunk = Vec::new();
            let read = reader.by_ref().take(room).read_until(b'\n', &mut chunk)?;
            if read == 0 {
                return Ok(None);
            }
            self.offset += read as u64;
            let complete = chunk.last() == Some(&b'\n');

            if self.discarding {
                self.discarding = !complete;
                continue;
            }

            self.pending.extend_from_slice(&chunk);
            if complete {
                let line = String::from_utf8_lossy(&self.pending).trim().to_string();
                self.pending.clear();
                return Ok(Some(line));
            }
            if self.pending.len() >= MAX_LINE_BYTES {
                tracing::warn!(
                    path = %self.path.display(),
                    bytes = self.pending.len(),
                    "dropping oversized sample line"
                );
                self.pending.clear();
                self.discarding = true;
            }
        }
    }

    fn step(&mut self) -> io::Result<Option<String>> {
        if !self.ensure_open()? {
            return Ok(None);
        }
        self.rewind_if_truncated()?;
        self.read_available_line()
    }
}

impl Iterator for LineFollower {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.stop.is_stopped() {
                return None;
            }
            match self.step() {
                Ok(Some(line)) => return Some(Ok(line)),
                Ok(None) => std::thread::sleep(self.poll_interval),
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

/// Offset of the first byte of the last line in `file`, ignoring one trailing newline.
fn last_line_offset(file: &mut File) -> io::Result<u64> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(0);
    }

    let mut end = len;
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    if last[0] == b'\n' {
        end -= 1;
    }

    let mut window_end = end;
    while window_end > 0 {
        let window_start = window_end.saturating_sub(BACKSCAN_CHUNK);
        let mut buf = vec![0u8; (window_end - window_start) as usize];
        file.seek(SeekFrom::Start(window_start))?;
        file.read_exact(&mut buf)?;
        if let Some(pos) = buf.iter().rposition(|b| *b == b'\n') {
            return Ok(window_start + pos as u64 + 1);
        }
        window_end = window_start;
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, OpenOptions};
    use std::io::Write;
    use std::thread;
    use tempfile::TempDir;

    const POLL: Duration = Duration::from_millis(10);

    fn append(path: &Path, text: &str) {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file.flush().unwrap();
    }

    #[test]
    fn starts_at_last_existing_line_then_follows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dstat.csv");
        fs::write(&path, "\"usr\",\"sys\",\"idl\"\n1,2,90.0,0\n3,4,80.0,0\n").unwrap();

        let mut follower = LineFollower::open(&path, POLL, StopSignal::new());
        assert_eq!(follower.next().unwrap().unwrap(), "3,4,80.0,0");

        append(&path, "5,6,70.0,0\n");
        assert_eq!(follower.next().unwrap().unwrap(), "5,6,70.0,0");
    }

    #[test]
    fn yielded_lines_are_trimmed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dstat.csv");
        fs::write(&path, "  5,3,73.2,1 \r\n").unwrap();

        let mut follower = LineFollower::open(&path, POLL, StopSignal::new());
        assert_eq!(follower.next().unwrap().unwrap(), "5,3,73.2,1");
    }

    #[test]
    fn partial_line_waits_for_newline() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dstat.csv");
        fs::write(&path, "first\n").unwrap();

        let mut follower = LineFollower::open(&path, POLL, StopSignal::new());
        assert_eq!(follower.next().unwrap().unwrap(), "first");

        append(&path, "5,3,");
        let writer_path = path.clone();
        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            append(&writer_path, "73.2,1\n");
        });

        assert_eq!(follower.next().unwrap().unwrap(), "5,3,73.2,1");
        writer.join().unwrap();
    }

    #[test]
    fn oversized_line_is_dropped_without_buffering_it() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dstat.csv");
        fs::write(&path, "start\n").unwrap();

        let mut follower = LineFollower::open(&path, POLL, StopSignal::new());
        assert_eq!(follower.next().unwrap().unwrap(), "start");

        let mut noise = "9".repeat(MAX_LINE_BYTES * 3 + 17);
        noise.push('\n');
        append(&path, &noise);
        append(&path, "5,3,73.2,1\n");

        assert_eq!(follower.next().unwrap().unwrap(), "5,3,73.2,1");
        assert!(follower.pending.is_empty());
        assert!(!follower.discarding);
    }

    #[test]
    fn waits_for_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("late.csv");

        let writer_path = path.clone();
        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            append(&writer_path, "1,2,3,4\n");
        });

        let mut follower = LineFollower::open(&path, POLL, StopSignal::new());
        assert_eq!(follower.next().unwrap().unwrap(), "1,2,3,4");
        writer.join().unwrap();
    }

    #[test]
    fn restarts_after_truncation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dstat.csv");
        fs::write(&path, "aaaa\nbbbb\n").unwrap();

        let mut follower = LineFollower::open(&path, POLL, StopSignal::new());
        assert_eq!(follower.next().unwrap().unwrap(), "bbbb");

        fs::write(&path, "z\n").unwrap();
        assert_eq!(follower.next().unwrap().unwrap(), "z");
    }

    #[test]
    fn stop_signal_ends_a_blocked_follower() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dstat.csv");
        fs::write(&path, "").unwrap();

        let stop = StopSignal::new();
        let mut follower = LineFollower::open(&path, POLL, stop.clone());

        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            stop.stop();
        });

        assert!(follower.next().is_none());
        stopper.join().unwrap();
    }

    #[test]
    fn last_line_offset_handles_long_files_and_missing_newline() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("long.csv");
        let mut contents = "x".repeat(10_000);
        contents.push('\n');
        contents.push_str("tail-without-newline");
        fs::write(&path, &contents).unwrap();

        let mut file = File::open(&path).unwrap();
        assert_eq!(last_line_offset(&mut file).unwrap(), 10_001);

        fs::write(&path, "single line\n").unwrap();
        let mut file = File::open(&path).unwrap();
        assert_eq!(last_line_offset(&mut file).unwrap(), 0);
    }
}
