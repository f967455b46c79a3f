//! Signed log creation and log statements.
//!
//! ```text
//! CreateLog          = owner pubkey (33) ∥ VarBytes(initial statement)
//! SignedCreateLog    = signature (64) ∥ CreateLog
//! LogStatement       = log id (32) ∥ varint index ∥ VarBytes(statement)
//! SignedLogStatement = signature (64) ∥ LogStatement
//! ```
//!
//! A log id is `SHA256(CreateLog)`. The witness stored in the dictionary is
//! `SHA256` of the whole signed message, signature included.

use bverify_primitives::{
    sha256,
    varint::{read_var_bytes, read_varint, take_array, var_bytes_len, varint_len, write_var_bytes, write_varint, MAX_VAR_BYTES},
    Hash, PrimitiveError, PrivateKey, PublicKey, Signature, HASH_LEN, PUBLIC_KEY_LEN, SIGNATURE_LEN,
};

use crate::{Result, WireError};

fn check_len(field: &'static str, bytes: &[u8]) -> Result<()> {
    if bytes.len() > MAX_VAR_BYTES {
        return Err(WireError::Field {
            what: field,
            source: PrimitiveError::FieldTooLong { field, len: bytes.len() as u64, max: MAX_VAR_BYTES },
        });
    }
    Ok(())
}

fn finish(what: &'static str, rest: &[u8]) -> Result<()> {
    if rest.is_empty() {
        Ok(())
    } else {
        Err(WireError::malformed(what, format!("{} trailing bytes", rest.len())))
    }
}

/// Request to open a new log controlled by `owner`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateLog {
    /// Key that signs every statement of the log
    pub owner: PublicKey,
    /// Statement 0
    pub initial_statement: Vec<u8>,
}

impl CreateLog {
    /// Unsigned request; see [`SignedCreateLog::sign`]
    pub fn new(owner: PublicKey, initial_statement: impl Into<Vec<u8>>) -> Self {
        Self { owner, initial_statement: initial_statement.into() }
    }

    /// Identity of the log this request creates
    pub fn log_id(&self) -> Hash {
        sha256(&self.to_bytes())
    }

    /// Length of [`Self::to_bytes`]
    pub fn encoded_len(&self) -> usize {
        PUBLIC_KEY_LEN + var_bytes_len(&self.initial_statement)
    }

    /// Append the encoding to `out`
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.owner.as_bytes());
        write_var_bytes(out, &self.initial_statement);
    }

    /// Wire encoding, also the preimage of the log id
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut out);
        out
    }

    /// Decode, rejecting trailing bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut input = bytes;
        let create = Self::decode(&mut input)?;
        finish("create log", input)?;
        Ok(create)
    }

    fn decode(input: &mut &[u8]) -> Result<Self> {
        let owner = take_array::<PUBLIC_KEY_LEN>(input).map_err(WireError::field("owner key"))?;
        let initial = read_var_bytes(input, MAX_VAR_BYTES, "initial statement")
            .map_err(WireError::field("initial statement"))?;
        Ok(Self {
            // Validated at verification time so a bad point reads as a bad signature.
            owner: PublicKey::from_array_unchecked(owner),
            initial_statement: initial.to_vec(),
        })
    }
}

/// [`CreateLog`] signed by its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedCreateLog {
    /// Owner's signature over the encoded [`CreateLog`]
    pub signature: Signature,
    /// What was signed
    pub create: CreateLog,
}

impl SignedCreateLog {
    /// Open a log owned by `key` with a first statement
    pub fn sign(key: &PrivateKey, initial_statement: impl Into<Vec<u8>>) -> Result<Self> {
        let create = CreateLog::new(key.public_key(), initial_statement);
        check_len("initial statement", &create.initial_statement)?;
        let signature = key.sign(&create.to_bytes());
        Ok(Self { signature, create })
    }

    /// Identity of the log this message creates
    pub fn log_id(&self) -> Hash {
        self.create.log_id()
    }

    /// Dictionary value recorded for this message
    pub fn witness(&self) -> Hash {
        sha256(&self.to_bytes())
    }

    /// Check the signature against the embedded owner key
    pub fn verify(&self) -> bverify_primitives::Result<()> {
        self.create.owner.verify(&self.create.to_bytes(), &self.signature)
    }

    /// Signature followed by the [`CreateLog`] encoding
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SIGNATURE_LEN + self.create.encoded_len());
        out.extend_from_slice(self.signature.as_bytes());
        self.create.encode_into(&mut out);
        out
    }

    /// Decode, rejecting trailing bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut input = bytes;
        let signature = take_array::<SIGNATURE_LEN>(&mut input).map_err(WireError::field("signature"))?;
        let create = CreateLog::decode(&mut input)?;
        finish("signed create log", input)?;
        Ok(Self { signature: Signature::from_array(signature), create })
    }
}

/// Statement number `index` of log `log_id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogStatement {
    /// Log the statement belongs to
    pub log_id: Hash,
    /// Position in the log, 0 being the initial statement
    pub index: u64,
    /// Opaque statement body
    pub statement: Vec<u8>,
}

impl LogStatement {
    /// Unsigned statement; see [`SignedLogStatement::sign`]
    pub fn new(log_id: Hash, index: u64, statement: impl Into<Vec<u8>>) -> Self {
        Self { log_id, index, statement: statement.into() }
    }

    /// Length of [`Self::to_bytes`]
    pub fn encoded_len(&self) -> usize {
        HASH_LEN + varint_len(self.index) + var_bytes_len(&self.statement)
    }

    /// Append the encoding to `out`
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.log_id);
        write_varint(out, self.index);
        write_var_bytes(out, &self.statement);
    }

    /// Wire encoding, the bytes that get signed
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut out);
        out
    }

    /// Decode, rejecting trailing bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut input = bytes;
        let statement = Self::decode(&mut input)?;
        finish("log statement", input)?;
        Ok(statement)
    }

    fn decode(input: &mut &[u8]) -> Result<Self> {
        let log_id = take_array::<HASH_LEN>(input).map_err(WireError::field("log id"))?;
        let index = read_varint(input).map_err(WireError::field("statement index"))?;
        let statement =
            read_var_bytes(input, MAX_VAR_BYTES, "statement").map_err(WireError::field("statement"))?;
        Ok(Self { log_id, index, statement: statement.to_vec() })
    }
}

/// [`LogStatement`] signed by the log's owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedLogStatement {
    /// Owner's signature over the encoded [`LogStatement`]
    pub signature: Signature,
    /// What was signed
    pub statement: LogStatement,
}

impl SignedLogStatement {
    /// Sign statement `index` of `log_id` with the log owner's key.
    ///
    /// Fails if the statement body is too long to encode.
    pub fn sign(key: &PrivateKey, log_id: Hash, index: u64, statement: impl Into<Vec<u8>>) -> Result<Self> {
        let statement = LogStatement::new(log_id, index, statement);
        check_len("statement", &statement.statement)?;
        let signature = key.sign(&statement.to_bytes());
        Ok(Self { signature, statement })
    }

    /// Log this statement extends
    pub fn log_id(&self) -> Hash {
        self.statement.log_id
    }

    /// Statement number within the log
    pub fn index(&self) -> u64 {
        self.statement.index
    }

    /// Dictionary value recorded for this message
    pub fn witness(&self) -> Hash {
        sha256(&self.to_bytes())
    }

    /// Check the signature against the log's registered owner
    pub fn verify(&self, owner: &PublicKey) -> bverify_primitives::Result<()> {
        owner.verify(&self.statement.to_bytes(), &self.signature)
    }

    /// Signature followed by the [`LogStatement`] encoding
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SIGNATURE_LEN + self.statement.encoded_len());
        out.extend_from_slice(self.signature.as_bytes());
        self.statement.encode_into(&mut out);
        out
    }

    /// Decode, rejecting trailing bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut input = bytes;
        let signature = take_array::<SIGNATURE_LEN>(&mut input).map_err(WireError::field("signature"))?;
        let statement = LogStatement::decode(&mut input)?;
        finish("signed log statement", input)?;
        Ok(Self { signature: Signature::from_array(signature), statement })
    }
}
