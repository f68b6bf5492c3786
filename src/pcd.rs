//! Decoder for Point Cloud Data (`.pcd`) files.
//!
//! Header parsing and `ascii`/`binary` records come from `pcd-rs`. A
//! `binary_compressed` body is inflated with LZF and rewritten as a plain
//! binary body before it is handed to the reader. Only the `x`, `y`, `z`
//! fields and an optional packed `rgb`/`rgba` field are kept.

use std::borrow::Cow;
use std::io::Cursor;

use pcd_rs::{DynReader, Field, FieldDef, ValueKind};
use thiserror::Error;

/// LZF never expands a back reference beyond 264 bytes from 3 input bytes.
const MAX_LZF_EXPANSION: usize = 128;

#[derive(Debug, Error)]
pub enum PcdError {
    #[error("header is missing the DATA line")]
    MissingData,
    #[error("DATA {0} is not supported")]
    UnsupportedEncoding(String),
    #[error("malformed PCD data")]
    Parse(#[from] anyhow::Error),
    #[error("required field `{0}` is missing")]
    MissingField(&'static str),
    #[error("color field `{field}` must hold one 4-byte value, found {layout}")]
    UnsupportedColorField { field: String, layout: String },
    #[error("field `{0}` holds no values")]
    EmptyField(String),
    #[error("header declares {points} points but the body holds at most {available}")]
    Truncated { points: u64, available: usize },
    #[error("field sizes overflow the record layout")]
    LayoutOverflow,
    #[error("invalid binary_compressed body: {0}")]
    Compressed(String),
}

/// Decoded attribute buffers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PcdCloud {
    /// Flat `xyz` triples.
    pub positions: Vec<f32>,
    /// Flat `rgb` triples in `[0, 1]`, present when the file has a color field.
    pub colors: Option<Vec<f32>>,
}

impl PcdCloud {
    pub fn point_count(&self) -> usize {
        self.positions.len() / 3
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Ascii,
    Binary,
    BinaryCompressed,
}

/// Where the DATA line sits in the raw file.
struct DataLine {
    encoding: Encoding,
    start: usize,
    body_start: usize,
}

/// Decodes a complete PCD file held in memory.
pub fn decode(data: &[u8]) -> Result<PcdCloud, PcdError> {
    let line = find_data_line(data)?;
    let header = strip_comments(&data[..line.start]);
    match line.encoding {
        Encoding::Ascii | Encoding::Binary => {
            let body_len = data.len() - line.body_start;
            let file = match header {
                Cow::Borrowed(_) => Cow::Borrowed(data),
                Cow::Owned(mut header) => {
                    header.extend_from_slice(&data[line.start..]);
                    Cow::Owned(header)
                }
            };
            read_records(&file, body_len, line.encoding)
        }
        Encoding::BinaryCompressed => {
            let (file, body_len) = expand_compressed(&header, &data[line.body_start..])?;
            read_records(&file, body_len, Encoding::Binary)
        }
    }
}

/// Header lines without `#` comments.
fn strip_comments(header: &[u8]) -> Cow<'_, [u8]> {
    let is_comment = |raw: &[u8]| raw.iter().find(|byte| !byte.is_ascii_whitespace()) == Some(&b'#');
    let lines = header.split_inclusive(|byte| *byte == b'\n');
    if !lines.clone().any(is_comment) {
        return Cow::Borrowed(header);
    }
    Cow::Owned(
        lines
            .filter(|raw| !is_comment(*raw))
            .flatten()
            .copied()
            .collect(),
    )
}

fn find_data_line(data: &[u8]) -> Result<DataLine, PcdError> {
    let mut start = 0;
    for raw in data.split_inclusive(|byte| *byte == b'\n') {
        let text = String::from_utf8_lossy(raw);
        let mut words = text.split_whitespace();
        if words.next().is_some_and(|key| key.eq_ignore_ascii_case("DATA")) {
            let encoding = match words.next().map(str::to_ascii_lowercase).as_deref() {
                Some("ascii") => Encoding::Ascii,
                Some("binary") => Encoding::Binary,
                Some("binary_compressed") => Encoding::BinaryCompressed,
                other => {
                    return Err(PcdError::UnsupportedEncoding(
                        other.unwrap_or_default().to_string(),
                    ))
                }
            };
            return Ok(DataLine {
                encoding,
                start,
                body_start: start + raw.len(),
            });
        }
        start += raw.len();
    }
    Err(PcdError::MissingData)
}

fn value_size(kind: &ValueKind) -> usize {
    match kind {
        ValueKind::U8 | ValueKind::I8 => 1,
        ValueKind::U16 | ValueKind::I16 => 2,
        ValueKind::U32 | ValueKind::I32 | ValueKind::F32 => 4,
        ValueKind::F64 => 8,
    }
}

/// Bytes one field occupies in a binary record.
fn field_width(field: &FieldDef) -> Result<usize, PcdError> {
    usize::try_from(field.count)
        .ok()
        .and_then(|count| count.checked_mul(value_size(&field.kind)))
        .ok_or(PcdError::LayoutOverflow)
}

fn record_size(fields: &[FieldDef]) -> Result<usize, PcdError> {
    fields.iter().try_fold(0usize, |total, field| {
        total
            .checked_add(field_width(field)?)
            .ok_or(PcdError::LayoutOverflow)
    })
}

/// Smallest number of body bytes a single record can take.
fn min_record_bytes(fields: &[FieldDef], encoding: Encoding) -> Result<usize, PcdError> {
    let bytes = match encoding {
        // One digit plus one separator per value.
        Encoding::Ascii => fields
            .iter()
            .try_fold(0usize, |total, field| {
                usize::try_from(field.count)
                    .ok()
                    .and_then(|count| total.checked_add(count))
            })
            .and_then(|values| values.checked_mul(2))
            .ok_or(PcdError::LayoutOverflow)?,
        Encoding::Binary | Encoding::BinaryCompressed => record_size(fields)?,
    };
    Ok(bytes.max(1))
}

fn field_index(fields: &[FieldDef], name: &'static str) -> Result<usize, PcdError> {
    fields
        .iter()
        .position(|field| field.name == name)
        .ok_or(PcdError::MissingField(name))
}

fn color_index(fields: &[FieldDef]) -> Result<Option<usize>, PcdError> {
    let index = fields
        .iter()
        .position(|field| field.name == "rgb")
        .or_else(|| fields.iter().position(|field| field.name == "rgba"));
    let Some(index) = index else {
        return Ok(None);
    };
    let field = &fields[index];
    let packed = matches!(field.kind, ValueKind::U32 | ValueKind::I32 | ValueKind::F32);
    if packed && field.count == 1 {
        Ok(Some(index))
    } else {
        Err(PcdError::UnsupportedColorField {
            field: field.name.clone(),
            layout: format!("{:?} x{}", field.kind, field.count),
        })
    }
}

fn read_records(file: &[u8], body_len: usize, encoding: Encoding) -> Result<PcdCloud, PcdError> {
    let reader = DynReader::from_reader(Cursor::new(file))?;
    let meta = reader.meta();
    let fields = &meta.field_defs.fields;
    let xyz = [
        field_index(fields, "x")?,
        field_index(fields, "y")?,
        field_index(fields, "z")?,
    ];
    let color = color_index(fields)?;

    let available = match encoding {
        Encoding::Ascii => (body_len + 1) / min_record_bytes(fields, encoding)?,
        _ => body_len / min_record_bytes(fields, encoding)?,
    };
    let points = match usize::try_from(meta.num_points) {
        Ok(points) if points <= available => points,
        _ => {
            return Err(PcdError::Truncated {
                points: meta.num_points,
                available,
            })
        }
    };
    let names: Vec<String> = fields.iter().map(|field| field.name.clone()).collect();

    let mut cloud = PcdCloud {
        positions: Vec::with_capacity(points * 3),
        colors: color.map(|_| Vec::with_capacity(points * 3)),
    };
    for record in reader.take(points) {
        let record = record?;
        for index in xyz {
            let value = first_value(&record.0[index])
                .ok_or_else(|| PcdError::EmptyField(names[index].clone()))?;
            cloud.positions.push(value);
        }
        if let (Some(index), Some(colors)) = (color, cloud.colors.as_mut()) {
            let packed = packed_color(&record.0[index])
                .ok_or_else(|| PcdError::EmptyField(names[index].clone()))?;
            colors.extend_from_slice(&unpack_rgb(packed));
        }
    }

    Ok(cloud)
}

fn first_value(field: &Field) -> Option<f32> {
    match field {
        Field::I8(values) => values.first().map(|value| f32::from(*value)),
        Field::I16(values) => values.first().map(|value| f32::from(*value)),
        Field::I32(values) => values.first().map(|value| *value as f32),
        Field::U8(values) => values.first().map(|value| f32::from(*value)),
        Field::U16(values) => values.first().map(|value| f32::from(*value)),
        Field::U32(values) => values.first().map(|value| *value as f32),
        Field::F32(values) => values.first().copied(),
        Field::F64(values) => values.first().map(|value| *value as f32),
    }
}

fn packed_color(field: &Field) -> Option<u32> {
    match field {
        Field::U32(values) => values.first().copied(),
        Field::I32(values) => values.first().map(|value| *value as u32),
        Field::F32(values) => values.first().map(|value| value.to_bits()),
        _ => None,
    }
}

/// Splits a packed color into `[0, 1]` channels: red in bits 16..24, green
/// in 8..16, blue in 0..8.
fn unpack_rgb(packed: u32) -> [f32; 3] {
    [
        ((packed >> 16) & 0xff) as f32 / 255.0,
        ((packed >> 8) & 0xff) as f32 / 255.0,
        (packed & 0xff) as f32 / 255.0,
    ]
}

fn read_u32(bytes: &[u8], at: usize) -> Option<usize> {
    let word = bytes.get(at..at + 4)?;
    Some(u32::from_le_bytes([word[0], word[1], word[2], word[3]]) as usize)
}

/// Rewrites a `binary_compressed` body as a `binary` file, returning the file
/// and the length of its body.
///
/// The compressed body is `compressed size`, `raw size` (both little-endian
/// `u32`) and an LZF block whose raw bytes store each field as one column.
fn expand_compressed(header: &[u8], body: &[u8]) -> Result<(Vec<u8>, usize), PcdError> {
    let mut file = header.to_vec();
    file.extend_from_slice(b"DATA binary\n");

    let (widths, row_size, num_points) = {
        let reader = DynReader::from_reader(Cursor::new(&file[..]))?;
        let meta = reader.meta();
        let widths = meta
            .field_defs
            .fields
            .iter()
            .map(field_width)
            .collect::<Result<Vec<_>, _>>()?;
        (widths, record_size(&meta.field_defs.fields)?, meta.num_points)
    };

    let invalid = |message: &str| PcdError::Compressed(message.to_string());
    let compressed_size = read_u32(body, 0).ok_or_else(|| invalid("missing size prefix"))?;
    let raw_size = read_u32(body, 4).ok_or_else(|| invalid("missing size prefix"))?;
    let payload = body
        .get(8..)
        .and_then(|rest| rest.get(..compressed_size))
        .ok_or_else(|| invalid("block is shorter than its size prefix"))?;

    let points = usize::try_from(num_points).map_err(|_| PcdError::LayoutOverflow)?;
    let expected = row_size
        .checked_mul(points)
        .ok_or(PcdError::LayoutOverflow)?;
    if raw_size != expected {
        return Err(PcdError::Compressed(format!(
            "raw size {raw_size} does not match {points} points of {row_size} bytes"
        )));
    }
    if raw_size == 0 {
        return Ok((file, 0));
    }
    if raw_size / MAX_LZF_EXPANSION > compressed_size {
        return Err(invalid("raw size exceeds what the block can expand to"));
    }

    let raw = lzf::decompress(payload, raw_size)
        .map_err(|err| PcdError::Compressed(format!("{err:?}")))?;
    if raw.len() != raw_size {
        return Err(invalid("block inflated to the wrong size"));
    }

    let columns: Vec<usize> = widths
        .iter()
        .scan(0, |offset, width| {
            let start = *offset;
            *offset += width * points;
            Some(start)
        })
        .collect();
    file.reserve(raw.len());
    for point in 0..points {
        for (column, width) in columns.iter().zip(&widths) {
            let start = column + point * width;
            file.extend_from_slice(&raw[start..start + width]);
        }
    }
    Ok((file, raw_size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;

    fn header(fields: &str, size: &str, kind: &str, count: &str, points: u64, data: &str) -> String {
        format!(
            "VERSION 0.7\nFIELDS {fields}\nSIZE {size}\nTYPE {kind}\nCOUNT {count}\nWIDTH {points}\nHEIGHT 1\nVIEWPOINT 0 0 0 1 0 0 0\nPOINTS {points}\nDATA {data}\n"
        )
    }

    static ASCII_CLOUD: Lazy<String> = Lazy::new(|| {
        "# .PCD v0.7 - Point Cloud Data file format\n".to_string()
            + &header("x y z rgb", "4 4 4 4", "F F F U", "1 1 1 1", 2, "ascii")
            + "0 0 0 16711680\n2 4 -2 65535\n"
    });

    fn binary_cloud(points: &[([f32; 3], [u8; 3])]) -> Vec<u8> {
        let mut data = header(
            "x y z rgb",
            "4 4 4 4",
            "F F F F",
            "1 1 1 1",
            points.len() as u64,
            "binary",
        )
        .into_bytes();
        for ([x, y, z], [r, g, b]) in points {
            data.extend_from_slice(&x.to_le_bytes());
            data.extend_from_slice(&y.to_le_bytes());
            data.extend_from_slice(&z.to_le_bytes());
            data.extend_from_slice(&[*b, *g, *r, 0]);
        }
        data
    }

    #[test]
    fn decodes_ascii_positions_and_colors() {
        let cloud = decode(ASCII_CLOUD.as_bytes()).unwrap();
        assert_eq!(cloud.point_count(), 2);
        assert_eq!(cloud.positions, vec![0.0, 0.0, 0.0, 2.0, 4.0, -2.0]);
        assert_eq!(
            cloud.colors,
            Some(vec![1.0, 0.0, 0.0, 0.0, 1.0, 1.0])
        );
    }

    #[test]
    fn decodes_ascii_float_packed_colors() {
        let packed = f32::from_bits(0x0000_ff00);
        let text = header("x y z rgb", "4 4 4 4", "F F F F", "1 1 1 1", 1, "ascii")
            + &format!("1 2 3 {packed:e}\n");
        let cloud = decode(text.as_bytes()).unwrap();
        assert_eq!(cloud.positions, vec![1.0, 2.0, 3.0]);
        assert_eq!(cloud.colors, Some(vec![0.0, 1.0, 0.0]));
    }

    #[test]
    fn decodes_binary_body() {
        let data = binary_cloud(&[
            ([1.0, 2.0, 3.0], [255, 0, 0]),
            ([-1.5, 0.25, 8.0], [0, 0, 255]),
        ]);
        let cloud = decode(&data).unwrap();
        assert_eq!(cloud.positions, vec![1.0, 2.0, 3.0, -1.5, 0.25, 8.0]);
        assert_eq!(cloud.colors, Some(vec![1.0, 0.0, 0.0, 0.0, 0.0, 1.0]));
    }

    #[test]
    fn skips_fields_that_are_not_positions() {
        let text = header("intensity x y z", "4 4 4 4", "F F F F", "1 1 1 1", 1, "ascii")
            + "0.7 5 6 7\n";
        let cloud = decode(text.as_bytes()).unwrap();
        assert_eq!(cloud.positions, vec![5.0, 6.0, 7.0]);
        assert!(cloud.colors.is_none());
    }

    #[test]
    fn reads_multi_count_fields_in_binary() {
        let mut data = header("x y z normal", "4 4 4 2", "F F F I", "1 1 1 3", 1, "binary")
            .into_bytes();
        for value in [1.0f32, 2.0, 3.0] {
            data.extend_from_slice(&value.to_le_bytes());
        }
        data.extend_from_slice(&[0; 6]);
        let cloud = decode(&data).unwrap();
        assert_eq!(cloud.positions, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn truncated_binary_body_is_an_error() {
        let mut data = binary_cloud(&[([1.0, 2.0, 3.0], [0, 0, 0]); 2]);
        data.truncate(data.len() - 4);
        assert!(matches!(
            decode(&data),
            Err(PcdError::Truncated {
                points: 2,
                available: 1
            })
        ));
    }

    #[test]
    fn point_count_beyond_the_body_is_rejected_before_reading() {
        let ascii = header("x y z", "4 4 4", "F F F", "1 1 1", 100_000_000_000, "ascii")
            + "1 2 3\n";
        assert!(matches!(
            decode(ascii.as_bytes()),
            Err(PcdError::Truncated {
                points: 100_000_000_000,
                available: 1
            })
        ));

        let mut binary =
            header("x y z", "4 4 4", "F F F", "1 1 1", u64::MAX, "binary").into_bytes();
        binary.extend_from_slice(&[0; 12]);
        assert!(matches!(
            decode(&binary),
            Err(PcdError::Truncated { available: 1, .. })
        ));
    }

    #[test]
    fn narrow_binary_color_field_is_rejected() {
        let mut data = header("x y z rgb", "4 4 4 1", "F F F U", "1 1 1 1", 1, "binary")
            .into_bytes();
        for value in [1.0f32, 2.0, 3.0] {
            data.extend_from_slice(&value.to_le_bytes());
        }
        data.push(0xff);
        assert!(matches!(
            decode(&data),
            Err(PcdError::UnsupportedColorField { ref field, .. }) if field == "rgb"
        ));
    }

    fn compressed_cloud(points: &[[f32; 3]], rgb: u32) -> Vec<u8> {
        let mut raw = Vec::new();
        for axis in 0..3 {
            for point in points {
                raw.extend_from_slice(&point[axis].to_le_bytes());
            }
        }
        for _ in points {
            raw.extend_from_slice(&rgb.to_le_bytes());
        }
        let block = lzf::compress(&raw).unwrap();

        let mut data = header(
            "x y z rgb",
            "4 4 4 4",
            "F F F U",
            "1 1 1 1",
            points.len() as u64,
            "binary_compressed",
        )
        .into_bytes();
        data.extend_from_slice(&(block.len() as u32).to_le_bytes());
        data.extend_from_slice(&(raw.len() as u32).to_le_bytes());
        data.extend_from_slice(&block);
        data
    }

    #[test]
    fn decodes_binary_compressed_columns() {
        let mut points = vec![[1.0, 2.0, 3.0]; 63];
        points.push([-4.0, 0.5, 9.0]);
        let data = compressed_cloud(&points, 0x00ff_0000);
        let cloud = decode(&data).unwrap();
        assert_eq!(cloud.point_count(), 64);
        assert_eq!(&cloud.positions[..3], &[1.0, 2.0, 3.0]);
        assert_eq!(&cloud.positions[189..], &[-4.0, 0.5, 9.0]);
        let colors = cloud.colors.unwrap();
        assert_eq!(&colors[..3], &[1.0, 0.0, 0.0]);
        assert_eq!(colors.len(), 64 * 3);
    }

    #[test]
    fn compressed_size_mismatch_is_an_error() {
        let points = vec![[1.0, 2.0, 3.0]; 64];
        let mut data = compressed_cloud(&points, 0);
        let body = find_data_line(&data).unwrap().body_start;
        data[body + 4..body + 8].copy_from_slice(&(64 * 16 + 16u32).to_le_bytes());
        assert!(matches!(decode(&data), Err(PcdError::Compressed(_))));

        data.truncate(body + 6);
        assert!(matches!(decode(&data), Err(PcdError::Compressed(_))));
    }

    #[test]
    fn header_errors_are_reported() {
        assert!(matches!(
            decode(b"VERSION 0.7\nFIELDS x y z\n"),
            Err(PcdError::MissingData)
        ));
        let missing_z = header("x y", "4 4", "F F", "1 1", 1, "ascii") + "1 2\n";
        assert!(matches!(
            decode(missing_z.as_bytes()),
            Err(PcdError::MissingField("z"))
        ));
        let unknown = header("x y z", "4 4 4", "F F F", "1 1 1", 1, "lzma");
        assert!(matches!(
            decode(unknown.as_bytes()),
            Err(PcdError::UnsupportedEncoding(ref encoding)) if encoding == "lzma"
        ));
        let bad_value = header("x y z", "4 4 4", "F F F", "1 1 1", 1, "ascii") + "1 two 3\n";
        assert!(matches!(
            decode(bad_value.as_bytes()),
            Err(PcdError::Parse(_))
        ));
    }
}
