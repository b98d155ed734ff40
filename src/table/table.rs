use log::{debug, warn};
use ndarray::Array4;
use std::ops::{DivAssign, MulAssign};
use std::path::Path;

use super::binning::{Axis, BinEdges, NUM_DIMS};
use super::error::{Operand, Result, TableError};
use super::header::{Efficiency, Header, HeaderValue};
use crate::io::fits::{CardValue, ImageHdu, read_fits, write_fits};

/// Value of the `TYPE` keyword of the primary HDU.
pub const TABLE_TYPE: &str = "Photon detection probability table";
/// Prefix of table header keys in the file, works around the 8-character
/// keyword limit.
const KEY_PREFIX: &str = "_i3_";
const ERRORS_HDU: &str = "ERRORS";

/// A photon detection probability table.
///
/// Holds the accumulated values, the accumulated squared weights (if
/// known), the bin edges and the header. Once built its shape never
/// changes; only in-place arithmetic modifies it.
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoTable {
    edges: BinEdges,
    values: Array4<f64>,
    weights: Option<Array4<f64>>,
    header: Header,
}

impl PhotoTable {
    pub fn new(
        edges: BinEdges,
        values: Array4<f64>,
        weights: Option<Array4<f64>>,
        header: Header,
    ) -> Result<Self> {
        let expected = edges.shape().to_vec();
        let shapes = std::iter::once(values.shape()).chain(weights.as_ref().map(|w| w.shape()));
        for shape in shapes {
            if shape != expected.as_slice() {
                return Err(TableError::ShapeMismatch {
                    ours: expected,
                    theirs: shape.to_vec(),
                });
            }
        }
        Ok(Self {
            edges,
            values,
            weights,
            header,
        })
    }

    pub fn edges(&self) -> &BinEdges {
        &self.edges
    }

    pub fn values(&self) -> &Array4<f64> {
        &self.values
    }

    /// Accumulated squared weights, absent for tables stored without them.
    pub fn weights(&self) -> Option<&Array4<f64>> {
        self.weights.as_ref()
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    pub fn n_photons(&self) -> f64 {
        self.header.n_photons
    }

    pub fn shape(&self) -> [usize; NUM_DIMS] {
        self.edges.shape()
    }

    pub fn bin_centers(&self, axis: Axis) -> Vec<f64> {
        self.edges.centers(axis)
    }

    pub fn bin_widths(&self, axis: Axis) -> Vec<f64> {
        self.edges.widths(axis)
    }

    /// Sum over all bins.
    pub fn total(&self) -> f64 {
        self.values.sum()
    }

    /// True once the table has been divided by its photon count.
    pub fn is_normalized(&self) -> bool {
        self.header.efficiency.contains(Efficiency::N_PHOTON)
    }

    /// Checks that `other` can be added to this table.
    pub fn check_compatible(&self, other: &PhotoTable) -> Result<()> {
        if self.values.shape() != other.values.shape() {
            return Err(TableError::ShapeMismatch {
                ours: self.values.shape().to_vec(),
                theirs: other.values.shape().to_vec(),
            });
        }
        for (operand, table) in [(Operand::This, self), (Operand::Other, other)] {
            let count = table.values.iter().filter(|v| !v.is_finite()).count();
            if count != 0 {
                warn!("{operand} has {count} non-finite values, refusing to combine");
                return Err(TableError::NonFiniteData { operand, count });
            }
        }
        self.header.check_compatible(&other.header)?;
        if self.weights.is_some() != other.weights.is_some() {
            return Err(TableError::VarianceMismatch);
        }
        Ok(())
    }

    /// Adds the statistics of `other` to this table.
    ///
    /// Leaves `self` untouched if the tables are incompatible.
    pub fn combine(&mut self, other: &PhotoTable) -> Result<()> {
        self.check_compatible(other)?;
        self.values += &other.values;
        if let (Some(ours), Some(theirs)) = (self.weights.as_mut(), other.weights.as_ref()) {
            *ours += theirs;
        }
        self.header.n_photons += other.header.n_photons;
        debug!(
            "Combined tables, photon count now {}",
            self.header.n_photons
        );
        Ok(())
    }

    /// Folds any number of compatible tables into one.
    ///
    /// Returns `None` for an empty input.
    pub fn merge<I>(tables: I) -> Result<Option<PhotoTable>>
    where
        I: IntoIterator<Item = PhotoTable>,
    {
        let mut tables = tables.into_iter();
        let Some(mut merged) = tables.next() else {
            return Ok(None);
        };
        for table in tables {
            merged.combine(&table)?;
        }
        Ok(Some(merged))
    }

    /// Multiplies the values by `factor` and the squared weights by `factor²`.
    pub fn scale(&mut self, factor: f64) {
        self.values *= factor;
        if let Some(weights) = self.weights.as_mut() {
            *weights *= factor * factor;
        }
    }

    /// Divides by the photon count, once.
    pub fn normalize(&mut self) -> Result<()> {
        if self.is_normalized() {
            return Ok(());
        }
        let n = self.header.n_photons;
        if !(n.is_finite() && n > 0.) {
            return Err(TableError::NoPhotons(n));
        }
        self.scale(1. / n);
        self.header.efficiency.insert(Efficiency::N_PHOTON);
        debug!("Normalized table to {n} photons");
        Ok(())
    }

    /// Writes the table to a FITS file.
    ///
    /// # Arguments
    /// * `path` - Destination file
    /// * `overwrite` - Replace an existing file instead of failing
    pub fn save(&self, path: &Path, overwrite: bool) -> Result<()> {
        if path.exists() && !overwrite {
            return Err(TableError::ExistingFile(path.to_path_buf()));
        }

        let mut hdus = Vec::with_capacity(2 + NUM_DIMS);

        let mut primary = ImageHdu::new(None, self.values.shape().to_vec(), flatten(&self.values));
        primary.cards.push((
            "TYPE".to_string(),
            CardValue::Str(TABLE_TYPE.to_string()),
        ));
        for (key, value) in self.header.to_records() {
            let card = match value {
                HeaderValue::Int(i) => CardValue::Int(i),
                HeaderValue::Float(x) => CardValue::Float(x),
                HeaderValue::Str(s) => CardValue::Str(s),
            };
            primary
                .cards
                .push((format!("{KEY_PREFIX}{key}").to_uppercase(), card));
        }
        hdus.push(primary);

        if let Some(weights) = &self.weights {
            hdus.push(ImageHdu::new(
                Some(ERRORS_HDU),
                weights.shape().to_vec(),
                flatten(weights),
            ));
        }

        for (i, edges) in self.edges.iter().enumerate() {
            hdus.push(ImageHdu::new(
                Some(&format!("EDGES{i}")),
                vec![edges.len()],
                edges.to_vec(),
            ));
        }

        write_fits(path, &hdus, overwrite)?;

        debug!("Saved {:?} table to {}", self.shape(), path.display());
        Ok(())
    }

    /// Reads a table written by [`PhotoTable::save`].
    ///
    /// Header keys are lower-cased and stripped of their storage prefix. A
    /// missing `ERRORS` array yields a table without weights.
    pub fn load(path: &Path) -> Result<Self> {
        let mut hdus = read_fits(path)?;
        if hdus.is_empty() {
            return Err(TableError::Format("file holds no images".to_string()));
        }
        let primary = hdus.remove(0);

        let shape: [usize; NUM_DIMS] = primary.shape.as_slice().try_into().map_err(|_| {
            TableError::Format(format!(
                "expected a {NUM_DIMS}-dimensional table, found shape {:?}",
                primary.shape
            ))
        })?;
        let values = to_array(shape, primary.data)?;

        let find = |name: &str| {
            hdus.iter()
                .position(|h| h.name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(name)))
        };

        let mut edges = Vec::with_capacity(NUM_DIMS);
        for i in 0..NUM_DIMS {
            let idx = find(&format!("EDGES{i}"))
                .ok_or_else(|| TableError::Format(format!("missing EDGES{i} extension")))?;
            edges.push(hdus[idx].data.clone());
        }
        let edges = BinEdges::from_vecs(edges)?;

        let weights = match find(ERRORS_HDU) {
            Some(idx) => {
                let hdu = hdus.swap_remove(idx);
                if hdu.shape != primary.shape {
                    return Err(TableError::ShapeMismatch {
                        ours: primary.shape,
                        theirs: hdu.shape,
                    });
                }
                Some(to_array(shape, hdu.data)?)
            }
            None => None,
        };

        let records = primary.cards.into_iter().filter_map(|(key, value)| {
            let key = key.to_lowercase();
            let key = key.strip_prefix(KEY_PREFIX)?.to_string();
            let value = match value {
                CardValue::Logical(b) => HeaderValue::Int(b as i64),
                CardValue::Int(i) => HeaderValue::Int(i),
                CardValue::Float(x) => HeaderValue::Float(x),
                CardValue::Str(s) => HeaderValue::Str(s),
            };
            Some((key, value))
        });
        let header = Header::from_records(records)?;

        debug!("Loaded {shape:?} table from {}", path.display());
        Self::new(edges, values, weights, header)
    }
}

impl MulAssign<f64> for PhotoTable {
    fn mul_assign(&mut self, factor: f64) {
        self.scale(factor);
    }
}

impl DivAssign<f64> for PhotoTable {
    fn div_assign(&mut self, divisor: f64) {
        self.scale(1. / divisor);
    }
}

fn flatten(array: &Array4<f64>) -> Vec<f64> {
    // Standard (row-major) order regardless of the in-memory layout
    array.iter().copied().collect()
}

fn to_array(shape: [usize; NUM_DIMS], data: Vec<f64>) -> Result<Array4<f64>> {
    Array4::from_shape_vec(shape, data)
        .map_err(|e| TableError::Format(format!("data does not fit shape {shape:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::tempdir;

    fn edges() -> BinEdges {
        BinEdges::new([
            vec![0., 1., 2.],
            vec![0., 90., 180.],
            vec![-1., 0., 1.],
            vec![0., 10., 20., 30.],
        ])
        .unwrap()
    }

    fn table(fill: f64, n_photons: f64) -> PhotoTable {
        let e = edges();
        let shape = e.shape();
        let values = Array4::from_shape_fn(shape, |(i, j, k, l)| {
            fill * (1 + i + 2 * j + 3 * k + 4 * l) as f64
        });
        let weights = values.mapv(|v| v * v);
        let header = Header {
            n_photons,
            ..Header::default()
        };
        PhotoTable::new(e, values, Some(weights), header).unwrap()
    }

    #[test]
    fn test_new_rejects_wrong_shape() {
        let err = PhotoTable::new(edges(), Array4::zeros((2, 2, 2, 2)), None, Header::default());
        assert!(matches!(err, Err(TableError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_derived_centers() {
        let t = table(1., 1.);
        assert_eq!(t.bin_centers(Axis::Radius), vec![0.5, 1.5]);
        assert_eq!(t.bin_widths(Axis::TimeResidual), vec![10., 10., 10.]);
    }

    #[test]
    fn test_combine_is_additive() {
        let a = table(1., 10.);
        let b = table(0.5, 4.);
        let mut sum = a.clone();
        sum.combine(&b).unwrap();
        assert_eq!(sum.values(), &(a.values() + b.values()));
        assert_eq!(
            sum.weights().unwrap(),
            &(a.weights().unwrap() + b.weights().unwrap())
        );
        assert_eq!(sum.n_photons(), 14.);
    }

    #[test]
    fn test_combine_rejects_header_mismatch() {
        let mut a = table(1., 10.);
        let mut b = table(1., 10.);
        b.header.zenith = 45.;
        let (a0, b0) = (a.clone(), b.clone());
        assert!(matches!(
            a.combine(&b),
            Err(TableError::HeaderMismatch { .. })
        ));
        assert_eq!(a, a0);
        assert_eq!(b, b0);
    }

    #[test]
    fn test_combine_rejects_non_finite() {
        let mut a = table(1., 1.);
        let mut b = table(1., 1.);
        b.values[[0, 0, 0, 0]] = f64::NAN;
        let a0 = a.clone();
        match a.combine(&b) {
            Err(TableError::NonFiniteData { operand, count }) => {
                assert_eq!(operand, Operand::Other);
                assert_eq!(count, 1);
            }
            other => panic!("expected non-finite error, got {other:?}"),
        }
        assert_eq!(a, a0);

        // Also refuses when the receiving table is the broken one
        let mut broken = b.clone();
        assert!(matches!(
            broken.combine(&a0),
            Err(TableError::NonFiniteData {
                operand: Operand::This,
                ..
            })
        ));
    }

    #[test]
    fn test_combine_rejects_shape_mismatch() {
        let mut a = table(1., 1.);
        let e = BinEdges::new([
            vec![0., 1.],
            vec![0., 180.],
            vec![-1., 1.],
            vec![0., 10.],
        ])
        .unwrap();
        let b = PhotoTable::new(e, Array4::zeros((1, 1, 1, 1)), None, Header::default()).unwrap();
        assert!(matches!(
            a.combine(&b),
            Err(TableError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_combine_rejects_variance_mismatch() {
        let mut a = table(1., 1.);
        let b = table(1., 1.);
        let b = PhotoTable::new(b.edges, b.values, None, b.header).unwrap();
        assert!(matches!(a.combine(&b), Err(TableError::VarianceMismatch)));
    }

    #[test]
    fn test_merge() {
        let merged = PhotoTable::merge(vec![table(1., 1.), table(2., 2.), table(3., 3.)])
            .unwrap()
            .unwrap();
        assert_relative_eq!(merged.total(), 6. * table(1., 1.).total(), epsilon = 1e-9);
        assert_eq!(merged.n_photons(), 6.);
        assert!(PhotoTable::merge(Vec::new()).unwrap().is_none());
    }

    #[test]
    fn test_scale() {
        let t = table(1., 1.);
        let mut scaled = t.clone();
        scaled.scale(3.);
        assert_eq!(scaled.values(), &(t.values() * 3.));
        assert_eq!(scaled.weights().unwrap(), &(t.weights().unwrap() * 9.));

        let mut halved = t.clone();
        halved /= 2.;
        assert_eq!(halved.values(), &(t.values() * 0.5));
        assert_eq!(halved.weights().unwrap(), &(t.weights().unwrap() * 0.25));
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let t = table(1., 4.);
        let mut once = t.clone();
        once.normalize().unwrap();
        let mut twice = t.clone();
        twice.normalize().unwrap();
        twice.normalize().unwrap();
        assert_eq!(once, twice);
        assert!(once.is_normalized());
        assert_eq!(once.values(), &(t.values() / 4.));
        assert_eq!(once.weights().unwrap(), &(t.weights().unwrap() / 16.));
    }

    #[test]
    fn test_normalize_without_photons() {
        let mut t = table(1., 0.);
        assert!(matches!(t.normalize(), Err(TableError::NoPhotons(_))));
        assert!(!t.is_normalized());
    }

    #[test]
    fn test_save_load_roundtrip() -> Result<()> {
        let dir = tempdir().map_err(anyhow::Error::from)?;
        let path = dir.path().join("table.fits");
        let mut t = table(0.25, 123.5);
        t.header = Header::for_flasher(90., -350., 1.35, 1.31, 127, 63);
        t.header.n_photons = 123.5;
        t.save(&path, false)?;

        let loaded = PhotoTable::load(&path)?;
        assert_eq!(loaded, t);
        Ok(())
    }

    #[test]
    fn test_save_leaves_neighbours_alone() -> Result<()> {
        let dir = tempdir().map_err(anyhow::Error::from)?;
        let path = dir.path().join("table.fits");
        let neighbour = dir.path().join("table.fits.partial");
        std::fs::write(&neighbour, b"user data").map_err(anyhow::Error::from)?;

        table(1., 1.).save(&path, false)?;
        table(2., 1.).save(&path, true)?;
        assert_eq!(PhotoTable::load(&path)?, table(2., 1.));
        assert_eq!(
            std::fs::read(&neighbour).map_err(anyhow::Error::from)?,
            b"user data"
        );
        let files = std::fs::read_dir(dir.path()).map_err(anyhow::Error::from)?.count();
        assert_eq!(files, 2);
        Ok(())
    }

    #[test]
    fn test_save_refuses_existing_file() -> Result<()> {
        let dir = tempdir().map_err(anyhow::Error::from)?;
        let path = dir.path().join("table.fits");
        let t = table(1., 1.);
        t.save(&path, false)?;
        assert!(matches!(
            t.save(&path, false),
            Err(TableError::ExistingFile(_))
        ));

        let mut bigger = t.clone();
        bigger.scale(2.);
        bigger.save(&path, true)?;
        assert_eq!(PhotoTable::load(&path)?, bigger);
        Ok(())
    }

    #[test]
    fn test_load_without_errors_array() -> Result<()> {
        let dir = tempdir().map_err(anyhow::Error::from)?;
        let path = dir.path().join("noerr.fits");
        let t = table(1., 1.);
        let t = PhotoTable::new(t.edges, t.values, None, t.header)?;
        t.save(&path, false)?;
        let loaded = PhotoTable::load(&path)?;
        assert!(loaded.weights().is_none());
        assert_eq!(loaded, t);
        Ok(())
    }
}
