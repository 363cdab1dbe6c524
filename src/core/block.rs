//! Hash-linked blocks of committed transfers.

use crate::core::transaction::TransactionDef;
use crate::types::encoding::{Decode, DecodeError, Encode, EncodeSink};
use crate::types::hash::Hash;

/// Block header linking a block to its parent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    /// Block index in the chain (genesis = 0)
    pub height: u64,
    /// SHA-256 of the encoded block with this field zeroed
    pub block_hash: Hash,
    /// Hash of the block at `height - 1`, zero for genesis
    pub prev_block_hash: Hash,
}

impl Header {
    /// Encodes the header with `hash` in place of the stored block hash.
    fn encode_with_hash<S: EncodeSink>(&self, out: &mut S, hash: &Hash) {
        self.height.encode(out);
        hash.encode(out);
        self.prev_block_hash.encode(out);
    }
}

impl Encode for Header {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.encode_with_hash(out, &self.block_hash);
    }
}

impl Decode for Header {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            height: u64::decode(input)?,
            block_hash: Hash::decode(input)?,
            prev_block_hash: Hash::decode(input)?,
        })
    }
}

/// Committed block: header plus the winning transfers in batch order.
///
/// The hash is computed once in [`Block::new`] and stored in the header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<TransactionDef>,
}

impl Block {
    /// Builds a block and fills in its self-referential hash.
    pub fn new(height: u64, prev_block_hash: Hash, transactions: Vec<TransactionDef>) -> Self {
        let mut block = Self {
            header: Header {
                height,
                block_hash: Hash::zero(),
                prev_block_hash,
            },
            transactions,
        };
        block.header.block_hash = block.compute_hash();
        block
    }

    /// Height 0: no transactions, zero parent hash.
    pub fn genesis() -> Self {
        Self::new(0, Hash::zero(), Vec::new())
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn hash(&self) -> Hash {
        self.header.block_hash
    }

    /// SHA-256 over the encoded block with the hash field zeroed.
    pub fn compute_hash(&self) -> Hash {
        let mut h = Hash::sha256();
        self.header.encode_with_hash(&mut h, &Hash::zero());
        self.transactions.encode(&mut h);
        h.finalize()
    }

    /// Returns true if the stored hash matches the block contents.
    pub fn verify_hash(&self) -> bool {
        self.compute_hash() == self.header.block_hash
    }
}

impl Encode for Block {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.header.encode(out);
        self.transactions.encode(out);
    }
}

impl Decode for Block {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            header: Header::decode(input)?,
            transactions: Vec::<TransactionDef>::decode(input)?,
        })
    }
}
