//! Conversion between [`Value`]s and safetensors tensors.
//!
//! Arrays are stored little endian with their own element type. A sequence
//! is stored as one tensor per item under `<key>#<index>`; its element type
//! and length are kept in the metadata so empty sequences survive.

use super::SerializationError;
use crate::graph::{DType, Value};
use ndarray::{ArrayD, IxDyn};
use safetensors::tensor::{SafeTensors, TensorView};
use safetensors::Dtype;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

type Result<T> = std::result::Result<T, SerializationError>;

/// Element type and length of a stored sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct SequenceInfo {
    pub dtype: DType,
    pub len: usize,
}

/// Raw tensors and sequence descriptions ready to be written.
#[derive(Default)]
pub(crate) struct TensorStore {
    tensors: Vec<(String, Dtype, Vec<usize>, Vec<u8>)>,
    pub sequences: BTreeMap<String, SequenceInfo>,
    keys: HashSet<String>,
}

fn storage_dtype(dtype: DType) -> Dtype {
    match dtype {
        DType::F32 => Dtype::F32,
        DType::F64 => Dtype::F64,
        DType::I64 => Dtype::I64,
        DType::Bool => Dtype::BOOL,
    }
}

fn item_key(key: &str, index: usize) -> String {
    format!("{key}#{index}")
}

impl TensorStore {
    pub fn insert(&mut self, key: String, value: &Value) -> Result<()> {
        if !self.keys.insert(key.clone()) {
            return Err(SerializationError::DuplicateKey(key));
        }
        let bytes: Vec<u8> = match value {
            Value::F32(a) => a.iter().flat_map(|x| x.to_le_bytes()).collect(),
            Value::F64(a) => a.iter().flat_map(|x| x.to_le_bytes()).collect(),
            Value::I64(a) => a.iter().flat_map(|x| x.to_le_bytes()).collect(),
            Value::Bool(a) => a.iter().map(|&b| u8::from(b)).collect(),
            Value::Sequence { dtype, items } => {
                for (i, item) in items.iter().enumerate() {
                    self.insert(item_key(&key, i), item)?;
                }
                self.sequences.insert(
                    key,
                    SequenceInfo {
                        dtype: *dtype,
                        len: items.len(),
                    },
                );
                return Ok(());
            }
        };
        self.tensors
            .push((key, storage_dtype(value.dtype()), value.shape(), bytes));
        Ok(())
    }

    /// Serializes every tensor with `metadata` into one safetensors buffer.
    pub fn serialize(&self, metadata: HashMap<String, String>) -> Result<Vec<u8>> {
        let mut views = Vec::with_capacity(self.tensors.len());
        for (key, dtype, shape, bytes) in &self.tensors {
            views.push((key.as_str(), TensorView::new(*dtype, shape.clone(), bytes)?));
        }
        Ok(safetensors::serialize(views, &Some(metadata))?)
    }
}

fn decode_array<T, const N: usize>(
    key: &str,
    shape: &[usize],
    data: &[u8],
    from_bytes: fn([u8; N]) -> T,
) -> Result<ArrayD<T>> {
    let values: Vec<T> = data
        .chunks_exact(N)
        .map(|chunk| {
            let mut bytes = [0u8; N];
            bytes.copy_from_slice(chunk);
            from_bytes(bytes)
        })
        .collect();
    ArrayD::from_shape_vec(IxDyn(shape), values)
        .map_err(|e| SerializationError::InvalidArray(key.to_string(), e.to_string()))
}

fn decode_tensor(key: &str, view: &TensorView<'_>) -> Result<Value> {
    let shape = view.shape();
    let data = view.data();
    let value = match view.dtype() {
        Dtype::F32 => Value::F32(decode_array(key, shape, data, f32::from_le_bytes)?),
        Dtype::F64 => Value::F64(decode_array(key, shape, data, f64::from_le_bytes)?),
        Dtype::I64 => Value::I64(decode_array(key, shape, data, i64::from_le_bytes)?),
        Dtype::BOOL => Value::Bool(decode_array(key, shape, data, |[b]: [u8; 1]| b != 0)?),
        other => {
            return Err(SerializationError::InvalidArray(
                key.to_string(),
                format!("unsupported element type {other:?}"),
            ))
        }
    };
    Ok(value)
}

/// Reads every value of a safetensors buffer, reassembling sequences.
pub(crate) fn decode_values(
    tensors: &SafeTensors<'_>,
    sequences: &BTreeMap<String, SequenceInfo>,
) -> Result<HashMap<String, Value>> {
    let mut values = HashMap::new();
    for (key, view) in tensors.tensors() {
        let value = decode_tensor(&key, &view)?;
        values.insert(key, value);
    }
    for (key, info) in sequences {
        let mut items = Vec::with_capacity(info.len);
        for i in 0..info.len {
            let item_key = item_key(key, i);
            let item = values
                .remove(&item_key)
                .ok_or(SerializationError::MissingArray(item_key))?;
            items.push(item);
        }
        values.insert(key.clone(), Value::sequence(info.dtype, items));
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_dtype_and_sequences_survive() {
        let mut store = TensorStore::default();
        let values = vec![
            ("a", Value::from_f32(&[2], vec![1.5, -2.0]).unwrap()),
            ("b", Value::scalar_f64(std::f64::consts::PI)),
            ("c", Value::from_i64(&[1, 3], vec![-1, 0, 7]).unwrap()),
            ("d", Value::scalar_bool(true)),
            (
                "s",
                Value::sequence(DType::F32, vec![Value::scalar_f32(1.0), Value::scalar_f32(2.0)]),
            ),
            ("empty", Value::sequence(DType::I64, vec![])),
        ];
        for (key, value) in &values {
            store.insert(key.to_string(), value).unwrap();
        }
        let bytes = store.serialize(HashMap::new()).unwrap();
        let tensors = SafeTensors::deserialize(&bytes).unwrap();
        let decoded = decode_values(&tensors, &store.sequences).unwrap();

        assert_eq!(decoded.len(), values.len());
        for (key, value) in &values {
            assert_eq!(&decoded[*key], value, "{key}");
        }
    }

    #[test]
    fn repeated_keys_are_an_error() {
        let mut store = TensorStore::default();
        store.insert("s#0".to_string(), &Value::scalar_f64(1.0)).unwrap();
        let err = store
            .insert("s".to_string(), &Value::sequence(DType::F64, vec![Value::scalar_f64(2.0)]))
            .unwrap_err();
        assert!(matches!(err, SerializationError::DuplicateKey(ref key) if key == "s#0"));
    }
}
