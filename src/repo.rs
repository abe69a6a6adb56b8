/*!
 * User-Record Repository
 *
 * Abstract store used by the register variant. The trait keeps the engine
 * independent of the storage backend; the in-process flat-file
 * implementation keeps one `<user>;<email>` record per line and enforces
 * the validation and capacity rules itself.
 */

use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Upper bound on stored records
pub const MAX_RECORDS: usize = 100;

/// Abstract user-record store
pub trait Repository: Send + Sync + 'static {
    /// Store a new record. Errors: `InvalidArgument` (validation),
    /// `AlreadyDefined` (username taken), `Resource` (record cap),
    /// `System` (store unavailable).
    fn register(&self, username: &str, email: &str) -> Result<()>;

    /// Look up the email recorded for `username`. Errors: `NotFound`,
    /// `System`.
    fn lookup(&self, username: &str) -> Result<String>;
}

/// Trim blanks and require at least one character, none of `;`, CR or LF
fn validate_username(username: &str) -> Option<&str> {
    let username = username.trim_matches([' ', '\t']);
    if username.is_empty() || username.bytes().any(|b| matches!(b, b';' | b'\r' | b'\n')) {
        return None;
    }
    Some(username)
}

/// Trim blanks and match `[A-Za-z0-9_.]+@([A-Za-z0-9]+\.)+[A-Za-z]{2,4}`
fn validate_email(email: &str) -> Option<&str> {
    let email = email.trim_matches([' ', '\t']);
    let (local, domain) = email.split_once('@')?;
    if local.is_empty()
        || !local
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'.')
    {
        return None;
    }

    let mut labels = domain.split('.');
    let last = labels.next_back()?;
    if !(2..=4).contains(&last.len()) || !last.bytes().all(|b| b.is_ascii_alphabetic()) {
        return None;
    }
    let mut label_count = 0;
    for label in labels {
        if label.is_empty() || !label.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return None;
        }
        label_count += 1;
    }
    if label_count == 0 {
        return None;
    }
    Some(email)
}

/// Flat-file repository: one `<user>;<email>` record per line
///
/// Reads take the shared side of the lock, registration takes the exclusive
/// side, so lookups proceed concurrently while writes serialize.
pub struct FlatFileRepository {
    /// Lock doubles as the datafile path holder so a reload can repoint it
    path: RwLock<PathBuf>,
}

impl FlatFileRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: RwLock::new(path.into()),
        }
    }

    /// Repoint the repository at another datafile (SIGHUP reload)
    pub fn set_datafile(&self, path: impl Into<PathBuf>) {
        *self.path.write() = path.into();
    }

    /// Scan the file for `username` (case-insensitive). Returns the email if
    /// found plus the number of lines read.
    fn find_user(path: &Path, username: &str) -> Result<(Option<String>, usize)> {
        let file = std::fs::File::open(path).map_err(Error::System)?;
        let mut lines_read = 0;
        for line in BufReader::new(file).lines() {
            let line = line.map_err(Error::System)?;
            lines_read += 1;
            let Some((candidate, email)) = line.split_once(';') else {
                continue;
            };
            if candidate.eq_ignore_ascii_case(username) {
                log::debug!("found record for '{username}'");
                return Ok((Some(email.to_string()), lines_read));
            }
        }
        log::debug!("username '{username}' not found");
        Ok((None, lines_read))
    }
}

impl Repository for FlatFileRepository {
    fn register(&self, username: &str, email: &str) -> Result<()> {
        let Some(username) = validate_username(username) else {
            log::warn!("user name '{username}' is not valid");
            return Err(Error::InvalidArgument("bad username".into()));
        };
        let Some(email) = validate_email(email) else {
            log::warn!("e-mail '{email}' is not valid");
            return Err(Error::InvalidArgument("bad email".into()));
        };

        // Exclusive side: the existence check and the append are one atomic
        // step with respect to other register calls.
        let path = self.path.write();

        let (existing, lines_read) = Self::find_user(&path, username)?;
        if existing.is_some() {
            return Err(Error::AlreadyDefined);
        }
        if lines_read >= MAX_RECORDS {
            log::error!("too many records in file");
            return Err(Error::Resource("record limit reached".into()));
        }

        log::debug!("adding new record (lines read = {lines_read})");
        let mut file = OpenOptions::new()
            .append(true)
            .open(&*path)
            .map_err(Error::System)?;
        writeln!(file, "{username};{email}").map_err(Error::System)?;
        Ok(())
    }

    fn lookup(&self, username: &str) -> Result<String> {
        let path = self.path.read();
        match Self::find_user(&path, username)? {
            (Some(email), _) => Ok(email),
            (None, _) => Err(Error::NotFound),
        }
    }
}
