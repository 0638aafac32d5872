use std::fs;
use std::io::{self, Write};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use plexus_crypto::ContentHasher;

/// Directory of lease files, one per exchange secret.
///
/// A lease file holds nothing but the address string. It is the node's
/// durable record of a past allocation and wins over a new election.
#[derive(Clone, Debug)]
pub struct LeaseStore {
    dir: PathBuf,
}

impl LeaseStore {
    /// Use `dir` without touching the filesystem.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Use `dir`, creating it owner-only if it does not exist.
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let store = Self::new(dir);
        store.ensure_dir()?;
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Lease file for `secret`.
    pub fn path_for(&self, secret: &str) -> PathBuf {
        let name = ContentHasher::LEASE.hash_hex(format!("{secret}-ek").as_bytes());
        self.dir.join(name)
    }

    /// The leased address, if a readable lease exists.
    ///
    /// Missing, unreadable or malformed files all mean "no lease"; only the
    /// latter two are logged.
    pub fn load(&self, secret: &str) -> Option<Ipv4Addr> {
        let path = self.path_for(secret);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read lease file");
                return None;
            }
        };
        match content.trim().parse() {
            Ok(address) => {
                debug!(path = %path.display(), %address, "found lease");
                Some(address)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring malformed lease file");
                None
            }
        }
    }

    /// Record `address` as the lease for `secret`.
    ///
    /// The content goes to a temporary file in the same directory which is
    /// then renamed over the lease, so readers see the old lease or the new
    /// one and never a torn write.
    pub fn store(&self, secret: &str, address: Ipv4Addr) -> io::Result<PathBuf> {
        self.ensure_dir()?;
        let path = self.path_for(secret);
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(address.to_string().as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        debug!(path = %path.display(), %address, "wrote lease");
        Ok(path)
    }

    fn ensure_dir(&self) -> io::Result<()> {
        if self.dir.is_dir() {
            return Ok(());
        }
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        builder.create(&self.dir)
    }
}
