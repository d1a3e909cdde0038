use super::{ArrayDataset, Dataset};
use crate::result::Result;
use anyhow::{bail, ensure, Context};
use byteorder::{BigEndian, ReadBytesExt};
use flate2::read::GzDecoder;
use ndarray::{Array, Array1};
use std::{
    fs::File,
    io::{BufReader, Read},
    path::{Path, PathBuf},
};

/// The kind of Mnist.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MnistKind {
    /// [MNIST](<http://yann.lecun.com/exdb/mnist/>)
    Digits,
    /// [FashionMNIST](<https://github.com/zalandoresearch/fashion-mnist>)
    Fashion,
}

impl MnistKind {
    fn dir_name(&self) -> &'static str {
        match self {
            Self::Digits => "mnist",
            Self::Fashion => "fashion-mnist",
        }
    }
}

/// Mnist builder.
pub mod builders {
    use super::{Mnist, MnistKind, Result};
    use std::path::Path;

    /// Mnist builder.
    #[derive(Debug)]
    pub struct MnistBuilder<'a> {
        pub(super) path: Option<&'a Path>,
        pub(super) kind: MnistKind,
    }

    impl Default for MnistBuilder<'_> {
        fn default() -> Self {
            Self {
                path: None,
                kind: MnistKind::Digits,
            }
        }
    }

    impl<'a> MnistBuilder<'a> {
        /// The folder containing the idx files.
        ///
        /// If not specified, uses "mnist" or "fashion-mnist" in the OS specific "Downloads" directory or the "Temp" directory.
        pub fn path(self, path: &'a Path) -> Self {
            Self {
                path: Some(path),
                ..self
            }
        }
        /// The kind of Mnist to use. Defaults to [`MnistKind::Digits`] (ie the original MNIST dataset).
        ///
        /// Only selects the default folder, both kinds share the same file format.
        pub fn kind(self, kind: MnistKind) -> Self {
            Self { kind, ..self }
        }
        /// Loads the dataset.
        ///
        /// Each file may be stored as is or gzipped with a ".gz" extension.
        ///
        /// **Errors**
        /// - The files were not found.
        /// - A file is not a valid idx file, or the images and labels do not match.
        pub fn build(&self) -> Result<Mnist> {
            Mnist::build(self)
        }
    }
}
use builders::MnistBuilder;

const IMAGES_MAGIC: i32 = 2_051;
const LABELS_MAGIC: i32 = 2_049;

/// The MNIST dataset.
///
/// Images are scaled to \[0, 1\] with shape \[n, 1, 28, 28\], and flattened by the network.
#[derive(Clone, Debug)]
pub struct Mnist {
    kind: MnistKind,
    train: ArrayDataset,
    test: ArrayDataset,
}

impl Mnist {
    /// Returns an [`MnistBuilder`] used to specify options.
    pub fn builder() -> MnistBuilder<'static> {
        MnistBuilder::default()
    }
    fn build(builder: &MnistBuilder) -> Result<Self> {
        let path = builder.path.map(Path::to_owned).unwrap_or_else(|| {
            dirs::download_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(builder.kind.dir_name())
        });
        let train = load_split(&path, "train")?;
        let test = load_split(&path, "t10k")?;
        tracing::debug!(
            "Loaded {:?} from {path:?}: {} train, {} test",
            builder.kind,
            train.len(),
            test.len(),
        );
        Ok(Self {
            kind: builder.kind,
            train,
            test,
        })
    }
    /// The kind.
    pub fn kind(&self) -> MnistKind {
        self.kind
    }
    /// The training set, typically 60_000 samples.
    pub fn train(&self) -> &ArrayDataset {
        &self.train
    }
    /// The test set, typically 10_000 samples.
    pub fn test(&self) -> &ArrayDataset {
        &self.test
    }
}

fn open(dir: &Path, name: &str) -> Result<Box<dyn Read>> {
    let path = dir.join(name);
    if path.exists() {
        return Ok(Box::new(BufReader::new(File::open(&path)?)));
    }
    let gz_path: PathBuf = dir.join(format!("{name}.gz"));
    let file = File::open(&gz_path)
        .with_context(|| format!("Unable to open {path:?} or {gz_path:?}!"))?;
    Ok(Box::new(GzDecoder::new(BufReader::new(file))))
}

fn read_header(reader: &mut impl Read, magic: i32, name: &str) -> Result<usize> {
    let found = reader.read_i32::<BigEndian>()?;
    ensure!(found == magic, "{name}: expected magic {magic}, found {found}!");
    let n = reader.read_i32::<BigEndian>()?;
    ensure!(n >= 0, "{name}: invalid length {n}!");
    Ok(n as usize)
}

fn load_split(dir: &Path, prefix: &str) -> Result<ArrayDataset> {
    let images_name = format!("{prefix}-images-idx3-ubyte");
    let labels_name = format!("{prefix}-labels-idx1-ubyte");

    let mut reader = open(dir, &images_name)?;
    let n = read_header(&mut reader, IMAGES_MAGIC, &images_name)?;
    let rows = reader.read_i32::<BigEndian>()?;
    let cols = reader.read_i32::<BigEndian>()?;
    ensure!(
        rows == 28 && cols == 28,
        "{images_name}: expected 28 x 28 images, found {rows} x {cols}!"
    );
    let Some(pixel_count) = n.checked_mul(28 * 28) else {
        bail!("{images_name}: invalid length {n}!");
    };
    let mut pixels = Vec::new();
    reader.read_to_end(&mut pixels)?;
    ensure!(
        pixels.len() == pixel_count,
        "{images_name}: expected {pixel_count} bytes of pixels, found {}!",
        pixels.len()
    );

    let mut reader = open(dir, &labels_name)?;
    let n_labels = read_header(&mut reader, LABELS_MAGIC, &labels_name)?;
    ensure!(n_labels == n, "{labels_name}: expected {n} labels, found {n_labels}!");
    let mut labels = Vec::new();
    reader.read_to_end(&mut labels)?;
    ensure!(
        labels.len() == n,
        "{labels_name}: expected {n} labels, found {}!",
        labels.len()
    );
    ensure!(
        labels.iter().all(|label| *label < 10),
        "{labels_name}: labels must be less than 10!"
    );

    let images = Array::from_shape_vec([n, 1, 28, 28], pixels)?.mapv(|x| x as f32 / 255.);
    let classes: Array1<usize> = labels.into_iter().map(usize::from).collect();
    ArrayDataset::new(images, classes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use flate2::{write::GzEncoder, Compression};
    use std::io::Write;

    fn idx_images(n: usize) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.write_i32::<BigEndian>(IMAGES_MAGIC).unwrap();
        bytes.write_i32::<BigEndian>(n as i32).unwrap();
        bytes.write_i32::<BigEndian>(28).unwrap();
        bytes.write_i32::<BigEndian>(28).unwrap();
        bytes.extend((0..n * 28 * 28).map(|i| (i % 256) as u8));
        bytes
    }

    fn idx_labels(n: usize) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.write_i32::<BigEndian>(LABELS_MAGIC).unwrap();
        bytes.write_i32::<BigEndian>(n as i32).unwrap();
        bytes.extend((0..n).map(|i| (i % 10) as u8));
        bytes
    }

    #[test]
    fn load_plain_and_gz() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("train-images-idx3-ubyte"), idx_images(12))?;
        std::fs::write(dir.path().join("train-labels-idx1-ubyte"), idx_labels(12))?;
        for (name, bytes) in [
            ("t10k-images-idx3-ubyte.gz", idx_images(3)),
            ("t10k-labels-idx1-ubyte.gz", idx_labels(3)),
        ] {
            let file = File::create(dir.path().join(name))?;
            let mut encoder = GzEncoder::new(file, Compression::fast());
            encoder.write_all(&bytes)?;
            encoder.finish()?;
        }
        let mnist = Mnist::builder().path(dir.path()).build()?;
        assert_eq!(mnist.train().len(), 12);
        assert_eq!(mnist.test().len(), 3);
        assert_eq!(mnist.train().inputs().shape(), &[12, 1, 28, 28]);
        assert_eq!(mnist.test().classes().to_vec(), [0, 1, 2]);
        assert_eq!(mnist.train().inputs()[[0, 0, 9, 3]], 1.);
        Ok(())
    }

    #[test]
    fn label_count_mismatch() -> Result<()> {
        let dir = tempfile::tempdir()?;
        for prefix in ["train", "t10k"] {
            std::fs::write(dir.path().join(format!("{prefix}-images-idx3-ubyte")), idx_images(4))?;
            std::fs::write(dir.path().join(format!("{prefix}-labels-idx1-ubyte")), idx_labels(5))?;
        }
        assert!(Mnist::builder().path(dir.path()).build().is_err());
        Ok(())
    }

    #[test]
    fn truncated_images() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut images = idx_images(2);
        images[4..8].copy_from_slice(&i32::MAX.to_be_bytes());
        std::fs::write(dir.path().join("train-images-idx3-ubyte"), images)?;
        std::fs::write(dir.path().join("train-labels-idx1-ubyte"), idx_labels(2))?;
        let error = Mnist::builder().path(dir.path()).build().unwrap_err();
        assert!(error.to_string().contains("bytes of pixels"), "{error}");
        let mut labels = idx_labels(2);
        labels[4..8].copy_from_slice(&i32::MAX.to_be_bytes());
        std::fs::write(dir.path().join("train-images-idx3-ubyte"), idx_images(2))?;
        std::fs::write(dir.path().join("train-labels-idx1-ubyte"), labels)?;
        let error = Mnist::builder().path(dir.path()).build().unwrap_err();
        assert!(error.to_string().contains("train-labels-idx1-ubyte"), "{error}");
        Ok(())
    }

    #[test]
    fn missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let error = Mnist::builder().path(dir.path()).build().unwrap_err();
        assert!(error.to_string().contains("train-images-idx3-ubyte"));
    }
}
