//! Input sets: CSV reading and writing, padding to the public set size, and generators for
//! benchmarks and tests.

use crate::Element;
use anyhow::{bail, Context, Result};
use rand::seq::SliceRandom;
use rand::{CryptoRng, Rng};
use std::collections::HashSet;
use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default input file of party `idx`.
pub fn default_input_path(idx: usize) -> PathBuf {
    PathBuf::from(format!("./data_id/data_{}.csv", idx))
}

/// Elements read from an input file, with counters of what was dropped.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InputSet {
    /// Distinct elements in file order, at most the requested set size.
    pub elements: Vec<Element>,
    /// Rows that could not be parsed.
    pub skipped_rows: usize,
    /// Rows repeating an earlier element.
    pub duplicate_rows: usize,
}

/// Parses a hexadecimal 64-bit value with an optional `0x` prefix.
pub fn parse_element(field: &str) -> Option<Element> {
    let token = field.split_whitespace().next()?;
    let digits = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .unwrap_or(token);
    u64::from_str_radix(digits, 16).ok().map(Element::from)
}

/// Reads up to `set_size` elements from the first column of `path`.
///
/// The first row is a header. Malformed and repeated rows are skipped with a warning and do
/// not take a slot. A missing file yields an empty set.
pub fn read_set_csv(path: &Path, set_size: usize) -> Result<InputSet> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!("{} does not exist, using an empty set", path.display());
            return Ok(InputSet::default());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("opening {} @{}:{}", path.display(), file!(), line!()))
        }
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(file);

    let mut input = InputSet::default();
    let mut seen = HashSet::new();

    for (row, record) in reader.records().enumerate() {
        if input.elements.len() >= set_size {
            break;
        }
        // +2: one for the header, one for counting from 1
        let line = row + 2;

        let parsed = match &record {
            Ok(r) => r.get(0).and_then(parse_element),
            Err(_) => None,
        };
        let x = match parsed {
            Some(x) => x,
            None => {
                warn!("{}:{}: skipping malformed row {:?}", path.display(), line, record);
                input.skipped_rows += 1;
                continue;
            }
        };

        if !seen.insert(x) {
            warn!("{}:{}: skipping repeated element {:#x}", path.display(), line, x);
            input.duplicate_rows += 1;
            continue;
        }
        input.elements.push(x);
    }

    debug!(
        "read {} elements from {} ({} malformed, {} repeated)",
        input.elements.len(),
        path.display(),
        input.skipped_rows,
        input.duplicate_rows
    );
    Ok(input)
}

/// Writes the union, one 128-bit element per row as 32 hex digits, without a header.
pub fn write_union_csv(path: &Path, union: &[Element]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("creating {} @{}:{}", path.display(), file!(), line!()))?;
    for x in union {
        writer
            .write_record([format!("{:032x}", x)])
            .with_context(|| format!("@{}:{}", file!(), line!()))?;
    }
    writer
        .flush()
        .with_context(|| format!("@{}:{}", file!(), line!()))?;
    Ok(())
}

/// A set stretched to exactly the public set size.
///
/// Slots past the real elements are dummies: they go through the protocol like any other slot
/// and are dropped by the circuit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaddedSet {
    slots: Vec<Element>,
    dummy: Vec<bool>,
}

impl PaddedSet {
    /// Deduplicates `elements`, keeps the first `set_size` and pads with dummies.
    pub fn new(elements: &[Element], set_size: usize) -> Self {
        let mut seen = HashSet::new();
        let mut slots = elements
            .iter()
            .copied()
            .filter(|x| seen.insert(*x))
            .collect::<Vec<_>>();
        if slots.len() > set_size {
            warn!(
                "{} elements given for a set size of {}, dropping the rest",
                slots.len(),
                set_size
            );
            slots.truncate(set_size);
        }

        let mut dummy = vec![false; slots.len()];
        dummy.resize(set_size, true);
        slots.resize(set_size, 0);

        Self { slots, dummy }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True if the set size is zero.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Values of all slots; dummies hold zero.
    pub fn slots(&self) -> &[Element] {
        &self.slots
    }

    /// Dummy flag of every slot.
    pub fn dummy(&self) -> &[bool] {
        &self.dummy
    }

    /// The real elements.
    pub fn elements(&self) -> Vec<Element> {
        self.slots
            .iter()
            .zip(&self.dummy)
            .filter(|(_, d)| !**d)
            .map(|(&x, _)| x)
            .collect()
    }
}

/// Creates `nparties` sets of `set_size` elements that all contain `common_size` shared
/// elements, plus the union of all sets.
pub fn create_sets_with_overlap<RNG>(
    nparties: usize,
    set_size: usize,
    common_size: usize,
    rng: &mut RNG,
) -> Result<(Vec<Element>, Vec<Vec<Element>>)>
where
    RNG: CryptoRng + Rng,
{
    if nparties == 0 {
        bail!("nparties (={}) == 0 @{}:{}", nparties, file!(), line!());
    }

    if set_size < common_size {
        bail!(
            "set_size (={}) < common_size (={}) @{}:{}",
            set_size,
            common_size,
            file!(),
            line!()
        );
    }

    // 64-bit values, as the CSV input carries
    let mut taken = HashSet::new();
    let mut fresh = |rng: &mut RNG| loop {
        let x = Element::from(rng.gen::<u64>());
        if taken.insert(x) {
            return x;
        }
    };

    let common = (0..common_size).map(|_| fresh(rng)).collect::<Vec<_>>();

    let mut sets = (0..nparties)
        .map(|_| {
            let mut set = common.clone();
            while set.len() < set_size {
                set.push(fresh(rng));
            }
            set
        })
        .collect::<Vec<_>>();

    let union = sets
        .iter()
        .flatten()
        .copied()
        .collect::<HashSet<_>>()
        .into_iter()
        .collect::<Vec<_>>();

    for set in sets.iter_mut() {
        set.shuffle(rng);
    }

    Ok((union, sets))
}

#[cfg(test)]
mod tests {
    use super::*;
    use scuttlebutt::AesRng;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_parse_element() {
        assert_eq!(parse_element("ff"), Some(0xff));
        assert_eq!(parse_element("0x1A2b"), Some(0x1a2b));
        assert_eq!(parse_element("  10 trailing"), Some(0x10));
        assert_eq!(parse_element("ffffffffffffffff"), Some(u64::MAX as u128));
        assert_eq!(parse_element("1ffffffffffffffff"), None);
        assert_eq!(parse_element("xyz"), None);
        assert_eq!(parse_element(""), None);
    }

    #[test]
    fn test_malformed_row_keeps_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "in.csv", "id\n01\nnot-hex\n02\n01\n03\n04\n");

        let input = read_set_csv(&path, 3).unwrap();
        assert_eq!(input.elements, vec![1, 2, 3]);
        assert_eq!(input.skipped_rows, 1);
        assert_eq!(input.duplicate_rows, 1);
    }

    #[test]
    fn test_extra_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "in.csv", "id,name\n0xab,alice\ncd,bob\n");

        let input = read_set_csv(&path, 10).unwrap();
        assert_eq!(input.elements, vec![0xab, 0xcd]);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let input = read_set_csv(&dir.path().join("nope.csv"), 4).unwrap();
        assert!(input.elements.is_empty());
    }

    #[test]
    fn test_write_union() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        write_union_csv(&path, &[1, u128::MAX]).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            format!("{:032x}\n{}\n", 1, "f".repeat(32))
        );
    }

    #[test]
    fn test_padded_set() {
        let set = PaddedSet::new(&[5, 7, 5, 9], 4);
        assert_eq!(set.len(), 4);
        assert_eq!(set.elements(), vec![5, 7, 9]);
        assert_eq!(set.dummy(), &[false, false, false, true]);

        let truncated = PaddedSet::new(&[1, 2, 3], 2);
        assert_eq!(truncated.elements(), vec![1, 2]);

        assert!(PaddedSet::new(&[1], 0).is_empty());
    }

    #[test]
    fn test_create_sets() {
        let mut rng = AesRng::new();
        let (union, sets) = create_sets_with_overlap(4, 20, 5, &mut rng).unwrap();

        assert_eq!(sets.len(), 4);
        assert!(sets.iter().all(|s| s.len() == 20));
        assert_eq!(union.len(), 5 + 4 * 15);
        assert!(create_sets_with_overlap(2, 2, 3, &mut rng).is_err());
    }
}
