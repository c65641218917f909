//! Persistence of offline material between the two phases.
//!
//! An artifact file is a bincode-encoded [ArtifactHeader] followed by the artifact itself.
//! Files are written through a temporary name and renamed, so a crash never leaves half an
//! artifact behind. The online phase consumes an artifact: it is loaded and the file removed.

use crate::{PartyIndex, RunId};
use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

const MAGIC: [u8; 4] = *b"MPSU";
const FORMAT_VERSION: u32 = 1;

/// Offline material that can be written to disk.
pub trait Artifact: Serialize + DeserializeOwned {
    /// Tag stored in the header and used in file names.
    const KIND: &'static str;

    /// The run that produced the artifact.
    fn run_id(&self) -> &RunId;
}

#[derive(Debug, Serialize, Deserialize)]
struct ArtifactHeader {
    magic: [u8; 4],
    kind: String,
    version: u32,
}

/// Writes `artifact` to `path`, replacing any previous file.
pub fn write_artifact<A: Artifact>(artifact: &A, path: &Path) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let file = File::create(&tmp)
            .with_context(|| format!("creating {} @{}:{}", tmp.display(), file!(), line!()))?;
        let mut writer = BufWriter::new(file);
        let header = ArtifactHeader {
            magic: MAGIC,
            kind: A::KIND.to_string(),
            version: FORMAT_VERSION,
        };
        bincode::serialize_into(&mut writer, &header)
            .with_context(|| format!("@{}:{}", file!(), line!()))?;
        bincode::serialize_into(&mut writer, artifact)
            .with_context(|| format!("@{}:{}", file!(), line!()))?;
        writer
            .flush()
            .with_context(|| format!("@{}:{}", file!(), line!()))?;
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("renaming to {} @{}:{}", path.display(), file!(), line!()))?;

    Ok(())
}

/// Reads an artifact of kind `A` from `path`.
pub fn read_artifact<A: Artifact>(path: &Path) -> Result<A> {
    let file = File::open(path)
        .with_context(|| format!("opening {} @{}:{}", path.display(), file!(), line!()))?;
    let mut reader = BufReader::new(file);

    let header: ArtifactHeader = bincode::deserialize_from(&mut reader)
        .with_context(|| format!("{} has no artifact header @{}:{}", path.display(), file!(), line!()))?;
    if header.magic != MAGIC || header.version != FORMAT_VERSION || header.kind != A::KIND {
        bail!(
            "{} holds {:?}, expected a {} artifact of version {} @{}:{}",
            path.display(),
            header,
            A::KIND,
            FORMAT_VERSION,
            file!(),
            line!()
        );
    }

    let artifact = bincode::deserialize_from(&mut reader)
        .with_context(|| format!("decoding {} @{}:{}", path.display(), file!(), line!()))?;

    Ok(artifact)
}

/// Directory holding the artifacts of the parties of one deployment.
#[derive(Clone, Debug)]
pub struct CorrelationStore {
    dir: PathBuf,
}

impl CorrelationStore {
    /// Store rooted at `dir`. The directory is created on the first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Location of party `me`'s artifact of kind `A`.
    pub fn path_for<A: Artifact>(&self, me: PartyIndex) -> PathBuf {
        self.dir.join(format!("{}_p{}.bin", A::KIND, me))
    }

    /// Persists party `me`'s artifact.
    pub fn write<A: Artifact>(&self, me: PartyIndex, artifact: &A) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating {} @{}:{}", self.dir.display(), file!(), line!()))?;
        let path = self.path_for::<A>(me);
        write_artifact(artifact, &path)?;
        debug!("party {} wrote {} to {}", me, A::KIND, path.display());
        Ok(path)
    }

    /// Loads party `me`'s artifact, `None` if there is none.
    pub fn load<A: Artifact>(&self, me: PartyIndex) -> Result<Option<A>> {
        let path = self.path_for::<A>(me);
        match fs::metadata(&path) {
            Ok(_) => read_artifact(&path).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("{} @{}:{}", path.display(), file!(), line!())),
        }
    }

    /// Loads party `me`'s artifact and deletes the file so it cannot be used again.
    pub fn consume<A: Artifact>(&self, me: PartyIndex) -> Result<A> {
        let path = self.path_for::<A>(me);
        let artifact = match self.load::<A>(me)? {
            Some(a) => a,
            None => bail!(
                "no {} for party {} at {}; the offline phase has to run first @{}:{}",
                A::KIND,
                me,
                path.display(),
                file!(),
                line!()
            ),
        };
        fs::remove_file(&path)
            .with_context(|| format!("removing {} @{}:{}", path.display(), file!(), line!()))?;
        debug!("party {} consumed {}", me, path.display());

        Ok(artifact)
    }
}
