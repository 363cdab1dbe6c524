//! Transfer definitions and their compiled programs.

use crate::types::encoding::{Decode, DecodeError, Encode, EncodeSink};
use crate::types::hash::Hash;
use crate::virtual_machine::isa::{Instruction, Program};
use serde::{Deserialize, Serialize};

/// Index of an 8-byte memory slot; the slot lives at byte offset `index * 8`.
pub type SlotIndex = u64;

/// Width of one memory slot in bytes.
pub const SLOT_SIZE: u64 = 8;

/// Source values above this take the halving branch of the transfer program.
const BRANCH_THRESHOLD: u64 = 128;

/// Amount the transfer program adds before storing into the destination slot.
const TRANSFER_AMOUNT: u64 = 32;

/// Value transfer between two memory slots.
///
/// The JSON form `{"idxFrom":..,"idxTo":..}` is the payload of one replicated
/// log entry and one line of a pending-queue snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionDef {
    #[serde(rename = "idxFrom")]
    pub from: SlotIndex,
    #[serde(rename = "idxTo")]
    pub to: SlotIndex,
}

impl TransactionDef {
    pub fn new(from: SlotIndex, to: SlotIndex) -> Self {
        Self { from, to }
    }

    /// Digest ordering this entry against others touching the same slot.
    ///
    /// `SHA256(wire form ++ index as big-endian u64)`. Smaller wins.
    pub fn priority_digest(&self, index: u64) -> Hash {
        let mut h = Hash::sha256();
        // Same bytes as `to_wire`, written directly so hashing cannot fail.
        h.update(format!(r#"{{"idxFrom":{},"idxTo":{}}}"#, self.from, self.to).as_bytes());
        h.update(&index.to_be_bytes());
        h.finalize()
    }

    /// Compiles the transfer into its VM program.
    ///
    /// Loads the source word, halves a flag when the source exceeds 128, then
    /// adds 32 and stores the result into the destination slot. The same
    /// definition always yields the same program.
    pub fn compile(&self) -> Program {
        let src = self.from.saturating_mul(SLOT_SIZE);
        let dst = self.to.saturating_mul(SLOT_SIZE);
        vec![
            Instruction::load(src, SLOT_SIZE),
            Instruction::dup(),
            Instruction::push(BRANCH_THRESHOLD),
            Instruction::cmp(),
            Instruction::sleep(),
            Instruction::jeq(9, 0),
            Instruction::push(2),
            Instruction::div(),
            Instruction::sleep(),
            Instruction::jmp(),
            Instruction::push(TRANSFER_AMOUNT),
            Instruction::add(),
            Instruction::sleep(),
            Instruction::store(dst),
        ]
    }

    /// Serializes to the JSON wire form.
    pub fn to_wire(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parses the JSON wire form.
    pub fn from_wire(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

impl Encode for TransactionDef {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.from.encode(out);
        self.to.encode(out);
    }
}

impl Decode for TransactionDef {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let from = SlotIndex::decode(input)?;
        let to = SlotIndex::decode(input)?;
        Ok(Self { from, to })
    }
}
