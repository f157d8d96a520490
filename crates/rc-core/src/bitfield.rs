//! # Bitfield Codec
//!
//! Maps `Identifier → bool` decisions onto an ordered bit sequence where bit
//! position `i` (1-indexed) stands for identifier `i`.
//!
//! ## Lossiness
//!
//! Only an explicit `true` sets a bit. An absent key and an explicit `false`
//! both encode as `0`, so [`decode`] can only ever return the granted
//! identifiers. Callers that must remember "user said no" versus "user was
//! never asked" keep that in the [`DecisionModel`](crate::DecisionModel) or the
//! storage format, never in a bitfield.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::BitfieldError;
use crate::models::{DecisionMap, Identifier};

/// An ordered bit sequence, serialized as a JSON array of `0`/`1`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<u64>", into = "Vec<u8>")]
pub struct BitField(Vec<bool>);

#[derive(Debug, Error)]
#[error("bit value {0} is neither 0 nor 1")]
pub struct InvalidBit(pub u64);

impl BitField {
    pub fn from_bits(bits: Vec<bool>) -> Self {
        Self(bits)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Zero-based bit lookup; out-of-range positions read as unset.
    pub fn is_set(&self, index: usize) -> bool {
        self.0.get(index).copied().unwrap_or(false)
    }

    pub fn bits(&self) -> &[bool] {
        &self.0
    }
}

impl TryFrom<Vec<u64>> for BitField {
    type Error = InvalidBit;

    fn try_from(raw: Vec<u64>) -> Result<Self, Self::Error> {
        raw.into_iter()
            .map(|bit| match bit {
                0 => Ok(false),
                1 => Ok(true),
                other => Err(InvalidBit(other)),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}

impl From<BitField> for Vec<u8> {
    fn from(field: BitField) -> Self {
        field.0.into_iter().map(u8::from).collect()
    }
}

/// Encode `mapping` into exactly `length` bits.
///
/// Keys beyond `length` are refused rather than truncated.
pub fn encode(mapping: &DecisionMap, length: usize) -> Result<BitField, BitfieldError> {
    let mut bits = vec![false; length];
    for (id, granted) in mapping {
        let index = id.bit_index();
        if index >= length {
            return Err(BitfieldError::OutOfRange { id: *id, length });
        }
        bits[index] = *granted;
    }
    Ok(BitField(bits))
}

/// Encode raw integer identifiers, rejecting zero and negatives up front.
pub fn encode_ids(granted: &[i64], length: usize) -> Result<BitField, BitfieldError> {
    let mapping = granted
        .iter()
        .map(|raw| Identifier::new(*raw).map(|id| (id, true)))
        .collect::<Result<DecisionMap, _>>()?;
    encode(&mapping, length)
}

/// Decode a bit sequence. Only set bits appear in the result, all as `true`.
pub fn decode(field: &BitField) -> DecisionMap {
    field
        .0
        .iter()
        .enumerate()
        .filter(|(_, set)| **set)
        .filter_map(|(index, _)| {
            u32::try_from(index + 1)
                .ok()
                .and_then(Identifier::from_u32)
                .map(|id| (id, true))
        })
        .collect()
}

/// Highest identifier present in any of `maps`; 0 when all are empty.
pub fn max_identifier<'a>(maps: impl IntoIterator<Item = &'a DecisionMap>) -> usize {
    maps.into_iter()
        .filter_map(|m| m.keys().next_back())
        .map(|id| id.get() as usize)
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: u32) -> Identifier {
        Identifier::from_u32(raw).unwrap()
    }

    #[test]
    fn identifier_n_sets_exactly_bit_n_minus_one() {
        for n in [1u32, 2, 24, 300] {
            let field = encode(&DecisionMap::from([(id(n), true)]), n as usize).unwrap();
            assert_eq!(field.len(), n as usize);
            let set: Vec<usize> = field
                .bits()
                .iter()
                .enumerate()
                .filter(|(_, b)| **b)
                .map(|(i, _)| i)
                .collect();
            assert_eq!(set, vec![n as usize - 1]);
        }
    }

    #[test]
    fn zero_and_negative_identifiers_are_rejected() {
        assert_eq!(encode_ids(&[0], 4), Err(BitfieldError::ZeroIdentifier));
        assert_eq!(encode_ids(&[2, -1], 4), Err(BitfieldError::NegativeIdentifier(-1)));
        assert!(encode_ids(&[4], 4).unwrap().is_set(3));
    }

    #[test]
    fn identifier_beyond_length_is_rejected() {
        let err = encode(&DecisionMap::from([(id(5), true)]), 4).unwrap_err();
        assert_eq!(err, BitfieldError::OutOfRange { id: id(5), length: 4 });
    }

    #[test]
    fn absent_and_false_encode_identically() {
        let explicit = encode(&DecisionMap::from([(id(1), true), (id(2), false)]), 3).unwrap();
        let absent = encode(&DecisionMap::from([(id(1), true)]), 3).unwrap();
        assert_eq!(explicit, absent);
    }

    #[test]
    fn decode_returns_only_granted_identifiers() {
        let field = encode(
            &DecisionMap::from([(id(1), true), (id(2), false), (id(4), true)]),
            6,
        )
        .unwrap();
        assert_eq!(decode(&field), DecisionMap::from([(id(1), true), (id(4), true)]));
    }

    #[test]
    fn serializes_as_zero_one_array() {
        let field = BitField::from_bits(vec![true, false, true]);
        assert_eq!(serde_json::to_string(&field).unwrap(), "[1,0,1]");
        assert_eq!(serde_json::from_str::<BitField>("[0,1]").unwrap().bits(), &[false, true]);
        assert!(serde_json::from_str::<BitField>("[0,2]").is_err());
    }

    #[test]
    fn max_identifier_spans_maps() {
        let a = DecisionMap::from([(id(3), false)]);
        let b = DecisionMap::from([(id(17), true), (id(2), true)]);
        assert_eq!(max_identifier([&a, &b]), 17);
        assert_eq!(max_identifier([&DecisionMap::new()]), 0);
    }
}
