//! Pair lists, datasets and the batch loader that feeds the training loop.
//!
//! A pairing list is a comma-separated file with one header row followed by
//! `reference,candidate,label` rows. Image paths are relative to an image
//! root directory; label 1 means authentic, 0 means forged.

use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use sigver_core::{Label, SigError, SignatureImage, SignaturePair};

use crate::rng::SimpleRng;

/// One row of a pairing list, paths already joined with the image root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairEntry {
    pub reference: PathBuf,
    pub candidate: PathBuf,
    pub label: Label,
}

/// Parsed pairing list.
#[derive(Debug, Clone, Default)]
pub struct PairList {
    entries: Vec<PairEntry>,
}

impl PairList {
    /// Reads a pairing list from disk.
    ///
    /// # Errors
    ///
    /// [`SigError::Io`] if the file cannot be read, [`SigError::Dataset`]
    /// for a malformed row.
    pub fn from_csv(path: impl AsRef<Path>, image_root: impl AsRef<Path>) -> Result<Self, SigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text, image_root.as_ref())
            .map_err(|e| SigError::dataset(format!("{}: {e}", path.display())))
    }

    /// Parses pairing-list text. The first line is always treated as a header.
    pub fn parse(text: &str, image_root: &Path) -> Result<Self, SigError> {
        let mut entries = Vec::new();
        for (lineno, line) in text.lines().enumerate().skip(1) {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            let [reference, candidate, label] = fields.as_slice() else {
                return Err(SigError::dataset(format!(
                    "line {}: expected 3 fields, found {}",
                    lineno + 1,
                    fields.len()
                )));
            };
            let value: i64 = label.parse().map_err(|_| {
                SigError::dataset(format!("line {}: bad label {label:?}", lineno + 1))
            })?;
            entries.push(PairEntry {
                reference: image_root.join(reference),
                candidate: image_root.join(candidate),
                label: Label::from_value(value)?,
            });
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[PairEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Random-access source of labelled pairs.
pub trait PairDataset {
    fn len(&self) -> usize;

    fn get(&self, index: usize) -> Result<SignaturePair, SigError>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Pairs held fully in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPairDataset {
    pairs: Vec<SignaturePair>,
}

impl InMemoryPairDataset {
    pub fn new(pairs: Vec<SignaturePair>) -> Self {
        Self { pairs }
    }
}

impl PairDataset for InMemoryPairDataset {
    fn len(&self) -> usize {
        self.pairs.len()
    }

    fn get(&self, index: usize) -> Result<SignaturePair, SigError> {
        self.pairs
            .get(index)
            .cloned()
            .ok_or_else(|| SigError::dataset(format!("pair index {index} out of range")))
    }
}

/// Decodes images from disk on every access.
#[derive(Debug, Clone)]
pub struct FilePairDataset {
    list: PairList,
    height: usize,
    width: usize,
}

impl FilePairDataset {
    pub fn new(list: PairList, height: usize, width: usize) -> Self {
        Self {
            list,
            height,
            width,
        }
    }
}

impl PairDataset for FilePairDataset {
    fn len(&self) -> usize {
        self.list.len()
    }

    fn get(&self, index: usize) -> Result<SignaturePair, SigError> {
        let entry = self
            .list
            .entries()
            .get(index)
            .ok_or_else(|| SigError::dataset(format!("pair index {index} out of range")))?;
        Ok(SignaturePair {
            reference: SignatureImage::from_path(&entry.reference, self.height, self.width)?,
            candidate: SignatureImage::from_path(&entry.candidate, self.height, self.width)?,
            label: entry.label,
        })
    }
}

/// A stacked batch ready for the model.
#[derive(Debug, Clone)]
pub struct PairBatch {
    /// `[B, 1, H, W]`
    pub reference: Tensor,
    /// `[B, 1, H, W]`
    pub candidate: Tensor,
    /// `[B]`, 0.0 or 1.0
    pub labels: Tensor,
}

impl PairBatch {
    pub fn from_pairs(pairs: &[SignaturePair], device: &Device) -> Result<Self, SigError> {
        let refs: Vec<&SignatureImage> = pairs.iter().map(|p| &p.reference).collect();
        let cands: Vec<&SignatureImage> = pairs.iter().map(|p| &p.candidate).collect();
        let labels: Vec<f32> = pairs.iter().map(|p| p.label.as_f32()).collect();
        Ok(Self {
            reference: SignatureImage::stack(&refs, device)?,
            candidate: SignatureImage::stack(&cands, device)?,
            labels: Tensor::from_vec(labels, pairs.len(), device)?,
        })
    }

    pub fn len(&self) -> usize {
        self.labels.dims1().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Groups a dataset into batches; optionally reshuffled every epoch.
///
/// The last batch of an epoch may be short. An empty dataset yields no
/// batches.
pub struct BatchLoader<'a, D: PairDataset + ?Sized> {
    dataset: &'a D,
    batch_size: usize,
    shuffle: bool,
    rng: SimpleRng,
    device: Device,
}

impl<'a, D: PairDataset + ?Sized> BatchLoader<'a, D> {
    pub fn new(
        dataset: &'a D,
        batch_size: usize,
        shuffle: bool,
        seed: u64,
        device: &Device,
    ) -> Result<Self, SigError> {
        if batch_size == 0 {
            return Err(SigError::invalid_config("batch size must be non-zero"));
        }
        Ok(Self {
            dataset,
            batch_size,
            shuffle,
            rng: SimpleRng::new(seed),
            device: device.clone(),
        })
    }

    pub fn num_batches(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    pub fn dataset_len(&self) -> usize {
        self.dataset.len()
    }

    /// Index groups for the next epoch. Advances the shuffle RNG.
    pub fn epoch_order(&mut self) -> Vec<Vec<usize>> {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if self.shuffle {
            self.rng.shuffle(&mut order);
        }
        order
            .chunks(self.batch_size)
            .map(<[usize]>::to_vec)
            .collect()
    }

    /// Loads and stacks the pairs at `indices`.
    pub fn load(&self, indices: &[usize]) -> Result<PairBatch, SigError> {
        let pairs = indices
            .iter()
            .map(|&i| self.dataset.get(i))
            .collect::<Result<Vec<_>, _>>()?;
        PairBatch::from_pairs(&pairs, &self.device)
    }

    /// Iterator over one epoch of batches.
    pub fn epoch(&mut self) -> EpochBatches<'_, 'a, D> {
        let order = self.epoch_order();
        EpochBatches {
            loader: self,
            order: order.into_iter(),
        }
    }
}

/// One epoch of batches from a [`BatchLoader`].
pub struct EpochBatches<'l, 'a, D: PairDataset + ?Sized> {
    loader: &'l BatchLoader<'a, D>,
    order: std::vec::IntoIter<Vec<usize>>,
}

impl<D: PairDataset + ?Sized> Iterator for EpochBatches<'_, '_, D> {
    type Item = Result<PairBatch, SigError>;

    fn next(&mut self) -> Option<Self::Item> {
        let indices = self.order.next()?;
        Some(self.loader.load(&indices))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.order.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(value: f32, label: Label) -> SignaturePair {
        SignaturePair {
            reference: SignatureImage::filled(4, 8, value),
            candidate: SignatureImage::filled(4, 8, -value),
            label,
        }
    }

    fn dataset(n: usize) -> InMemoryPairDataset {
        InMemoryPairDataset::new(
            (0..n)
                .map(|i| {
                    let label = if i % 2 == 0 { Label::Authentic } else { Label::Forged };
                    pair(i as f32, label)
                })
                .collect(),
        )
    }

    #[test]
    fn parse_skips_header_and_joins_root() {
        let text = "0,1,2\na/1.png,b/1.png,1\n\na/2.png, b/2.png ,0\n";
        let list = PairList::parse(text, Path::new("/data")).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list.entries()[0].reference, PathBuf::from("/data/a/1.png"));
        assert_eq!(list.entries()[1].candidate, PathBuf::from("/data/b/2.png"));
        assert_eq!(list.entries()[1].label, Label::Forged);
    }

    #[test]
    fn parse_rejects_bad_rows() {
        let root = Path::new(".");
        assert!(PairList::parse("h\na,b\n", root).is_err());
        assert!(PairList::parse("h\na,b,yes\n", root).is_err());
        assert!(PairList::parse("h\na,b,3\n", root).is_err());
    }

    #[test]
    fn batches_cover_dataset_with_short_tail() {
        let ds = dataset(5);
        let mut loader = BatchLoader::new(&ds, 2, false, 0, &Device::Cpu).unwrap();
        assert_eq!(loader.num_batches(), 3);
        let batches: Vec<PairBatch> = loader.epoch().collect::<Result<_, _>>().unwrap();
        let sizes: Vec<usize> = batches.iter().map(PairBatch::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(batches[0].reference.dims(), &[2, 1, 4, 8]);
        assert_eq!(
            batches[0].labels.to_vec1::<f32>().unwrap(),
            vec![1.0, 0.0]
        );
    }

    #[test]
    fn shuffle_is_seeded_permutation() {
        let ds = dataset(10);
        let mut a = BatchLoader::new(&ds, 3, true, 9, &Device::Cpu).unwrap();
        let mut b = BatchLoader::new(&ds, 3, true, 9, &Device::Cpu).unwrap();
        let first = a.epoch_order();
        assert_eq!(first, b.epoch_order());
        let mut flat: Vec<usize> = first.concat();
        flat.sort_unstable();
        assert_eq!(flat, (0..10).collect::<Vec<_>>());
        assert_ne!(first, a.epoch_order());
    }

    #[test]
    fn empty_dataset_yields_nothing() {
        let ds = dataset(0);
        let mut loader = BatchLoader::new(&ds, 4, true, 1, &Device::Cpu).unwrap();
        assert_eq!(loader.epoch().count(), 0);
    }

    #[test]
    fn zero_batch_size_rejected() {
        let ds = dataset(1);
        assert!(BatchLoader::new(&ds, 0, false, 0, &Device::Cpu).is_err());
    }

    #[test]
    fn file_dataset_reports_missing_image() {
        let list = PairList::parse("h\nmissing1.png,missing2.png,1\n", Path::new("/nonexistent")).unwrap();
        let ds = FilePairDataset::new(list, 4, 8);
        assert!(matches!(ds.get(0), Err(SigError::Dataset { .. })));
        assert!(ds.get(1).is_err());
    }
}
