//! Minimal FITS image I/O.
//!
//! Only what photon tables need: a primary image HDU followed by any number
//! of `IMAGE` extensions, floating-point data (BITPIX -32 or -64) and
//! `HIERARCH` keywords for names that do not fit the 8-character limit.
//! Everything is stored in 2880-byte blocks made of 80-character cards,
//! data in big-endian byte order.

use anyhow::{Context, Result, anyhow, bail, ensure};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;

const BLOCK: usize = 2880;
const CARD: usize = 80;

/// Value of a header card.
#[derive(Debug, Clone, PartialEq)]
pub enum CardValue {
    Logical(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

/// One image HDU.
///
/// `shape` is given in row-major order (slowest axis first), which is the
/// reverse of the FITS `NAXISn` numbering.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageHdu {
    /// `EXTNAME` of an extension, ignored for the primary HDU.
    pub name: Option<String>,
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
    /// Keywords other than the structural ones.
    pub cards: Vec<(String, CardValue)>,
}

impl ImageHdu {
    pub fn new(name: Option<&str>, shape: Vec<usize>, data: Vec<f64>) -> Self {
        Self {
            name: name.map(str::to_string),
            shape,
            data,
            cards: Vec::new(),
        }
    }

    pub fn card(&self, key: &str) -> Option<&CardValue> {
        self.cards
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }
}

/// Writes HDUs to a FITS file. The first HDU becomes the primary one.
///
/// The data goes to a temporary file in the same directory first, which is
/// moved into place once complete. A failed write leaves `path` untouched.
///
/// # Arguments
/// * `path` - Path to the output file
/// * `hdus` - At least one image
/// * `overwrite` - Replace an existing file instead of failing
pub fn write_fits(path: &Path, hdus: &[ImageHdu], overwrite: bool) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let file = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create file in: {}", dir.display()))?;
    let mut writer = BufWriter::new(file);
    encode_fits(&mut writer, hdus)
        .with_context(|| format!("Failed to write FITS data to: {}", path.display()))?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;

    let persisted = if overwrite {
        file.persist(path)
    } else {
        file.persist_noclobber(path)
    };
    persisted
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to move FITS file to: {}", path.display()))?;
    Ok(())
}

/// Reads all image HDUs of a FITS file.
pub fn read_fits(path: &Path) -> Result<Vec<ImageHdu>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open file: {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    decode_fits(&bytes).with_context(|| format!("Failed to parse FITS file: {}", path.display()))
}

/// Serializes HDUs into any writer.
pub fn encode_fits<W: Write>(writer: &mut W, hdus: &[ImageHdu]) -> Result<()> {
    ensure!(!hdus.is_empty(), "a FITS file needs at least one HDU");

    for (i, hdu) in hdus.iter().enumerate() {
        let n_values: usize = hdu.shape.iter().product();
        ensure!(
            n_values == hdu.data.len(),
            "HDU {i}: shape {:?} does not match {} data values",
            hdu.shape,
            hdu.data.len()
        );

        let mut cards: Vec<String> = Vec::new();
        if i == 0 {
            cards.push(format_card("SIMPLE", &CardValue::Logical(true))?);
        } else {
            cards.push(format_card("XTENSION", &CardValue::Str("IMAGE".to_string()))?);
        }
        cards.push(format_card("BITPIX", &CardValue::Int(-64))?);
        cards.push(format_card("NAXIS", &CardValue::Int(hdu.shape.len() as i64))?);
        for (n, len) in hdu.shape.iter().rev().enumerate() {
            cards.push(format_card(
                &format!("NAXIS{}", n + 1),
                &CardValue::Int(*len as i64),
            )?);
        }
        if i == 0 {
            cards.push(format_card("EXTEND", &CardValue::Logical(true))?);
        } else {
            cards.push(format_card("PCOUNT", &CardValue::Int(0))?);
            cards.push(format_card("GCOUNT", &CardValue::Int(1))?);
            if let Some(name) = &hdu.name {
                cards.push(format_card("EXTNAME", &CardValue::Str(name.clone()))?);
            }
        }
        for (key, value) in &hdu.cards {
            cards.push(format_card(key, value)?);
        }
        cards.push(format!("{:<CARD$}", "END"));

        let mut header = cards.concat().into_bytes();
        header.resize(padded_len(header.len()), b' ');
        writer.write_all(&header)?;

        let mut data = Vec::with_capacity(padded_len(hdu.data.len() * 8));
        for v in &hdu.data {
            data.extend_from_slice(&v.to_be_bytes());
        }
        data.resize(padded_len(data.len()), 0);
        writer.write_all(&data)?;
    }

    Ok(())
}

/// Parses the HDUs of an in-memory FITS file.
pub fn decode_fits(bytes: &[u8]) -> Result<Vec<ImageHdu>> {
    let mut hdus = Vec::new();
    let mut offset = 0;

    while offset < bytes.len() {
        let (cards, header_len) = parse_header(&bytes[offset..])
            .with_context(|| format!("Invalid header in HDU {}", hdus.len()))?;
        offset += header_len;

        let int_card = |key: &str| -> Result<i64> {
            match cards.iter().find(|(k, _)| k == key) {
                Some((_, CardValue::Int(v))) => Ok(*v),
                Some((_, other)) => bail!("keyword {key} is not an integer: {other:?}"),
                None => bail!("missing keyword {key}"),
            }
        };

        let bitpix = int_card("BITPIX")?;
        let naxis = int_card("NAXIS")?;
        ensure!((0..=999).contains(&naxis), "invalid NAXIS {naxis}");
        let mut shape = Vec::with_capacity(naxis as usize);
        for n in 1..=naxis {
            let len = int_card(&format!("NAXIS{n}"))?;
            ensure!(len >= 0, "negative NAXIS{n}");
            shape.push(len as usize);
        }
        shape.reverse();
        let n_values: usize = if shape.is_empty() {
            0
        } else {
            shape
                .iter()
                .try_fold(1usize, |acc, &len| acc.checked_mul(len))
                .ok_or_else(|| anyhow!("image of shape {shape:?} is too large"))?
        };

        let width = match bitpix {
            -64 => 8,
            -32 => 4,
            other => bail!("unsupported BITPIX {other}, only floating-point images are read"),
        };
        let data_end = n_values
            .checked_mul(width)
            .and_then(|len| offset.checked_add(len))
            .ok_or_else(|| anyhow!("image of shape {shape:?} is too large"))?;
        let data_len = data_end - offset;
        let data_bytes = bytes
            .get(offset..data_end)
            .ok_or_else(|| anyhow!("data section of HDU {} is truncated", hdus.len()))?;
        let data: Vec<f64> = if width == 8 {
            data_bytes
                .chunks_exact(8)
                .map(|c| f64::from_be_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                .collect()
        } else {
            data_bytes
                .chunks_exact(4)
                .map(|c| f32::from_be_bytes([c[0], c[1], c[2], c[3]]) as f64)
                .collect()
        };
        offset += padded_len(data_len);

        let name = cards.iter().find_map(|(k, v)| match (k.as_str(), v) {
            ("EXTNAME", CardValue::Str(s)) => Some(s.clone()),
            _ => None,
        });
        let cards = cards
            .into_iter()
            .filter(|(k, _)| !is_structural(k))
            .collect();

        hdus.push(ImageHdu {
            name,
            shape,
            data,
            cards,
        });
    }

    ensure!(!hdus.is_empty(), "file contains no HDU");
    Ok(hdus)
}

fn padded_len(len: usize) -> usize {
    len.div_ceil(BLOCK) * BLOCK
}

fn is_structural(key: &str) -> bool {
    matches!(
        key,
        "SIMPLE" | "XTENSION" | "BITPIX" | "NAXIS" | "EXTEND" | "PCOUNT" | "GCOUNT" | "EXTNAME"
    ) || key
        .strip_prefix("NAXIS")
        .is_some_and(|n| n.chars().all(|c| c.is_ascii_digit()))
}

fn format_value(value: &CardValue) -> Result<String> {
    Ok(match value {
        CardValue::Logical(b) => format!("{:>20}", if *b { "T" } else { "F" }),
        CardValue::Int(i) => format!("{i:>20}"),
        CardValue::Float(x) => {
            ensure!(x.is_finite(), "FITS can't store the non-finite value {x}");
            // Always carries an exponent, so it reads back as a float
            format!("{:>20}", format!("{x:E}"))
        }
        CardValue::Str(s) => {
            ensure!(s.is_ascii(), "FITS strings must be ASCII: {s:?}");
            format!("'{:<8}'", s.replace('\'', "''"))
        }
    })
}

fn format_card(key: &str, value: &CardValue) -> Result<String> {
    let value = format_value(value)?;
    let card = if key.len() <= 8
        && key
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_' || c == '-')
    {
        format!("{key:<8}= {value}")
    } else {
        format!("HIERARCH {key} = {}", value.trim_start())
    };
    ensure!(card.len() <= CARD, "card too long for key {key}: {card}");
    Ok(format!("{card:<CARD$}"))
}

/// Returns the keyword cards and the padded header length.
fn parse_header(bytes: &[u8]) -> Result<(Vec<(String, CardValue)>, usize)> {
    let mut cards = Vec::new();
    for (n, raw) in bytes.chunks(CARD).enumerate() {
        ensure!(raw.len() == CARD, "header ends in the middle of a card");
        let card = std::str::from_utf8(raw)
            .ok()
            .filter(|c| c.is_ascii())
            .ok_or_else(|| anyhow!("header is not ASCII"))?;
        let keyword = card[..8].trim_end();
        match keyword {
            "END" => return Ok((cards, padded_len((n + 1) * CARD))),
            "HIERARCH" => {
                let (key, value) = card[8..]
                    .split_once('=')
                    .ok_or_else(|| anyhow!("HIERARCH card without value: {card}"))?;
                cards.push((key.trim().to_string(), parse_value(value)?));
            }
            "" | "COMMENT" | "HISTORY" => {}
            _ if &card[8..10] == "= " => {
                cards.push((keyword.to_string(), parse_value(&card[10..])?));
            }
            _ => {}
        }
    }
    bail!("no END card")
}

fn parse_value(text: &str) -> Result<CardValue> {
    let text = text.trim_start();
    if let Some(rest) = text.strip_prefix('\'') {
        let mut value = String::new();
        let mut chars = rest.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    chars.next();
                } else {
                    return Ok(CardValue::Str(value.trim_end().to_string()));
                }
            }
            value.push(c);
        }
        bail!("unterminated string value: {text}");
    }

    let value = text.split('/').next().unwrap_or_default().trim();
    match value {
        "T" => Ok(CardValue::Logical(true)),
        "F" => Ok(CardValue::Logical(false)),
        _ if value.contains(['.', 'E', 'e', 'D', 'd']) => value
            .replace(['D', 'd'], "E")
            .parse::<f64>()
            .map(CardValue::Float)
            .with_context(|| format!("invalid float value: {value}")),
        _ => value
            .parse::<i64>()
            .map(CardValue::Int)
            .with_context(|| format!("invalid value: {value}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_hdus() -> Vec<ImageHdu> {
        let mut primary = ImageHdu::new(None, vec![2, 3], vec![0., 1., 2., 3.5, -4., 1e-30]);
        primary.cards.push((
            "TYPE".to_string(),
            CardValue::Str("Photon detection probability table".to_string()),
        ));
        primary
            .cards
            .push(("_I3_N_PHOTONS".to_string(), CardValue::Float(1234.5)));
        primary
            .cards
            .push(("_I3_LEVEL".to_string(), CardValue::Int(1)));
        let edges = ImageHdu::new(Some("EDGES0"), vec![3], vec![0., 0.5, 1.]);
        vec![primary, edges]
    }

    #[test]
    fn test_blocks_are_padded() {
        let mut bytes = Vec::new();
        encode_fits(&mut bytes, &sample_hdus()).unwrap();
        // Each HDU: one header block + one data block
        assert_eq!(bytes.len(), 4 * BLOCK);
        assert!(bytes.starts_with(b"SIMPLE  =                    T"));
    }

    #[test]
    fn test_encode_decode() {
        let hdus = sample_hdus();
        let mut bytes = Vec::new();
        encode_fits(&mut bytes, &hdus).unwrap();
        let decoded = decode_fits(&bytes).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].shape, vec![2, 3]);
        assert_eq!(decoded[0].data, hdus[0].data);
        assert_eq!(decoded[0].cards, hdus[0].cards);
        assert_eq!(decoded[1].name.as_deref(), Some("EDGES0"));
        assert_eq!(decoded[1].data, vec![0., 0.5, 1.]);
    }

    #[test]
    fn test_float32_data() {
        let mut bytes = Vec::new();
        let mut header = String::new();
        for card in [
            format_card("SIMPLE", &CardValue::Logical(true)).unwrap(),
            format_card("BITPIX", &CardValue::Int(-32)).unwrap(),
            format_card("NAXIS", &CardValue::Int(1)).unwrap(),
            format_card("NAXIS1", &CardValue::Int(2)).unwrap(),
        ] {
            header.push_str(&card);
        }
        header.push_str(&format!("{:<80}", "END"));
        bytes.extend_from_slice(header.as_bytes());
        bytes.resize(BLOCK, b' ');
        bytes.extend_from_slice(&1.5f32.to_be_bytes());
        bytes.extend_from_slice(&(-2.0f32).to_be_bytes());
        bytes.resize(2 * BLOCK, 0);

        let hdus = decode_fits(&bytes).unwrap();
        assert_eq!(hdus[0].data, vec![1.5, -2.0]);
    }

    #[test]
    fn test_string_quotes() {
        let card = format_card("OBJECT", &CardValue::Str("it's".to_string())).unwrap();
        assert_eq!(card.len(), CARD);
        assert_eq!(
            parse_value(&card[10..]).unwrap(),
            CardValue::Str("it's".to_string())
        );
    }

    #[test]
    fn test_value_with_comment() {
        assert_eq!(parse_value("  42 / answer").unwrap(), CardValue::Int(42));
        assert_eq!(parse_value(" 1.0D2").unwrap(), CardValue::Float(100.));
    }

    #[test]
    fn test_rejects_non_finite_header() {
        assert!(format_card("X", &CardValue::Float(f64::NAN)).is_err());
    }

    #[test]
    fn test_shape_mismatch() {
        let hdu = ImageHdu::new(None, vec![2, 2], vec![0.; 3]);
        let mut bytes = Vec::new();
        assert!(encode_fits(&mut bytes, &[hdu]).is_err());
    }

    #[test]
    fn test_file_roundtrip() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("t.fits");
        let hdus = sample_hdus();
        write_fits(&path, &hdus, false)?;
        let loaded = read_fits(&path)?;
        assert_eq!(loaded, hdus);
        Ok(())
    }

    #[test]
    fn test_write_keeps_existing_file() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("t.fits");
        std::fs::write(&path, b"precious")?;
        assert!(write_fits(&path, &sample_hdus(), false).is_err());
        assert_eq!(std::fs::read(&path)?, b"precious");

        // A failed encode does not touch the target either
        let bad = ImageHdu::new(None, vec![2], vec![0.; 3]);
        assert!(write_fits(&path, &[bad], true).is_err());
        assert_eq!(std::fs::read(&path)?, b"precious");

        write_fits(&path, &sample_hdus(), true)?;
        assert_eq!(read_fits(&path)?, sample_hdus());
        // No temporary files are left behind
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 1);
        Ok(())
    }

    fn header_only(cards: &[(&str, i64)]) -> Vec<u8> {
        let mut header = format_card("SIMPLE", &CardValue::Logical(true)).unwrap();
        for (key, value) in cards {
            header.push_str(&format_card(key, &CardValue::Int(*value)).unwrap());
        }
        header.push_str(&format!("{:<80}", "END"));
        let mut bytes = header.into_bytes();
        bytes.resize(BLOCK, b' ');
        bytes
    }

    #[test]
    fn test_huge_shape_is_an_error() {
        let huge = 1i64 << 62;
        let bytes = header_only(&[
            ("BITPIX", -64),
            ("NAXIS", 2),
            ("NAXIS1", huge),
            ("NAXIS2", huge),
        ]);
        let err = decode_fits(&bytes).unwrap_err();
        assert!(err.to_string().contains("too large"), "{err}");

        // Fits in usize but not once multiplied by the sample width
        let bytes = header_only(&[("BITPIX", -64), ("NAXIS", 1), ("NAXIS1", huge)]);
        let err = decode_fits(&bytes).unwrap_err();
        assert!(err.to_string().contains("too large"), "{err}");
    }

    #[test]
    fn test_truncated_file() {
        let mut bytes = Vec::new();
        encode_fits(&mut bytes, &sample_hdus()).unwrap();
        bytes.truncate(BLOCK + 10);
        assert!(decode_fits(&bytes).is_err());
    }
}
