//! Tile joining: merge the layers of the same tile from several stores,
//! optionally attaching attributes from a CSV table keyed on its first
//! column, and re-encode.

use std::collections::{HashMap, HashSet};

use tilery_tile_utils::mvt::{MvtLayer, MvtValue, decode_tile, encode_tile};
use tilery_tile_utils::{decode_gzip, encode_gzip, is_gzipped};

use crate::errors::{StoreError, StoreResult};

/// A CSV attribute table. The first column is the join key; the
/// remaining columns become attributes of matching features.
#[derive(Debug, Clone)]
pub struct CsvTable {
    pub key_column: String,
    columns: Vec<String>,
    rows: HashMap<String, Vec<String>>,
}

impl CsvTable {
    pub fn parse(text: &str) -> StoreResult<Self> {
        let mut lines = text.lines();
        let header = lines
            .next()
            .ok_or_else(|| StoreError::MalformedJoinTable("empty table".to_string()))?;
        let mut header = split_csv_line(header)?;
        if header.is_empty() {
            return Err(StoreError::MalformedJoinTable("empty header".to_string()));
        }
        let key_column = header.remove(0);

        let mut rows = HashMap::new();
        for (number, line) in lines.enumerate() {
            if line.is_empty() {
                continue;
            }
            let mut fields = split_csv_line(line)?;
            if fields.len() != header.len() + 1 {
                return Err(StoreError::MalformedJoinTable(format!(
                    "row {} has {} fields, header has {}",
                    number + 2,
                    fields.len(),
                    header.len() + 1
                )));
            }
            let key = fields.remove(0);
            rows.insert(key, fields);
        }
        Ok(Self {
            key_column,
            columns: header,
            rows,
        })
    }

    /// The attributes joined onto a feature whose key column has `key`.
    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<impl Iterator<Item = (&str, &str)>> {
        self.rows.get(key).map(|fields| {
            self.columns
                .iter()
                .map(String::as_str)
                .zip(fields.iter().map(String::as_str))
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// One line of the quoted-CSV dialect: commas separate fields, fields may
/// be double-quoted, doubled quotes escape a quote.
fn split_csv_line(line: &str) -> StoreResult<Vec<String>> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars().peekable();
    let mut quoted = false;
    while let Some(c) = chars.next() {
        if quoted {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    current.push('"');
                } else {
                    quoted = false;
                }
            } else {
                current.push(c);
            }
        } else {
            match c {
                '"' => quoted = true,
                ',' => fields.push(std::mem::take(&mut current)),
                _ => current.push(c),
            }
        }
    }
    if quoted {
        return Err(StoreError::MalformedJoinTable(format!(
            "unterminated quote in line: {line}"
        )));
    }
    fields.push(current);
    Ok(fields)
}

/// Guess a value type for joined CSV attributes the way the metadata
/// scanner does: plain numbers become numbers, everything else strings.
fn csv_value(text: &str) -> MvtValue {
    if let Ok(i) = text.parse::<i64>() {
        MvtValue::Int(i)
    } else if let Ok(f) = text.parse::<f64>() {
        MvtValue::Double(f)
    } else {
        MvtValue::String(text.to_string())
    }
}

/// Merge the (gzipped) copies of one tile into a single tile: layers of
/// the same name are concatenated, the CSV join and attribute exclusions
/// are applied, and the result is re-encoded and re-compressed.
pub fn merge_tile(
    copies: &[Vec<u8>],
    csv: Option<&CsvTable>,
    exclude: &HashSet<String>,
) -> StoreResult<Vec<u8>> {
    let mut merged: Vec<MvtLayer> = Vec::new();
    for data in copies {
        let raw = if is_gzipped(data) {
            decode_gzip(data)?
        } else {
            data.clone()
        };
        for layer in decode_tile(&raw)? {
            let idx = merged
                .iter()
                .position(|l| l.name == layer.name)
                .unwrap_or_else(|| {
                    merged.push(MvtLayer::new(layer.name.clone(), layer.extent));
                    merged.len() - 1
                });
            let target = &mut merged[idx];
            for feature in &layer.features {
                let mut out = tilery_tile_utils::mvt::MvtFeature {
                    id: feature.id,
                    geom_type: feature.geom_type,
                    tags: Vec::new(),
                    geometry: feature.geometry.clone(),
                };
                let mut join_key: Option<String> = None;
                for pair in feature.tags.chunks_exact(2) {
                    let key = layer.keys[pair[0] as usize].clone();
                    let value = layer.values[pair[1] as usize].clone();
                    if csv.is_some_and(|t| t.key_column == key) {
                        join_key = Some(value.to_string());
                    }
                    if exclude.contains(&key) {
                        continue;
                    }
                    target.tag(&mut out, &key, &value);
                }
                if let Some(table) = csv {
                    if let Some(joined) = join_key.as_deref().and_then(|k| table.lookup(k)) {
                        for (key, text) in joined {
                            if !exclude.contains(key) && !text.is_empty() {
                                target.tag(&mut out, key, &csv_value(text));
                            }
                        }
                    }
                }
                target.features.push(out);
            }
        }
    }
    Ok(encode_gzip(&encode_tile(&merged))?)
}
