use chrono::{DateTime, Utc};
use ed25519_dalek::Keypair;
use serde::{Deserialize, Serialize};

use crate::crypto::{
    self, public_key_from_hex, public_key_to_hex, signature_from_hex, signature_to_hex,
};
use crate::errors::{ChainError, ChainResult};

use super::{Hash, NodeId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryType {
    Read,
    Write,
}

/// Header of a SQL query request issued by a client node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestHeader {
    pub query_type: QueryType,
    pub node_id: NodeId,
    pub connection_id: u64,
    pub seq_no: u64,
    pub batch_count: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignedRequestHeader {
    pub header: RequestHeader,
    pub header_hash: Hash,
    pub signee: String,
    pub signature: String,
}

impl SignedRequestHeader {
    pub fn pack_and_sign(header: RequestHeader, keypair: &Keypair) -> ChainResult<Self> {
        let (header_hash, signee, signature) = sign_header(&header, keypair)?;
        Ok(Self {
            header,
            header_hash,
            signee,
            signature,
        })
    }

    pub fn verify(&self) -> ChainResult<()> {
        verify_header(&self.header, &self.header_hash, &self.signee, &self.signature)
    }
}

/// Header of a response produced by the database node that served the
/// wrapped request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseHeader {
    pub request: SignedRequestHeader,
    pub node_id: NodeId,
    pub row_count: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignedResponseHeader {
    pub header: ResponseHeader,
    pub header_hash: Hash,
    pub signee: String,
    pub signature: String,
}

impl SignedResponseHeader {
    pub fn pack_and_sign(header: ResponseHeader, keypair: &Keypair) -> ChainResult<Self> {
        let (header_hash, signee, signature) = sign_header(&header, keypair)?;
        Ok(Self {
            header,
            header_hash,
            signee,
            signature,
        })
    }

    /// Timestamp of the wrapped request, which keys the response into a
    /// chain height.
    pub fn request_timestamp(&self) -> DateTime<Utc> {
        self.header.request.header.timestamp
    }

    pub fn verify(&self) -> ChainResult<()> {
        self.header.request.verify()?;
        verify_header(&self.header, &self.header_hash, &self.signee, &self.signature)
    }
}

/// Acknowledgment signed by the requester after receiving a response,
/// proving the query round-trip.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AckHeader {
    pub response: SignedResponseHeader,
    pub node_id: NodeId,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignedAckHeader {
    pub header: AckHeader,
    pub header_hash: Hash,
    pub signee: String,
    pub signature: String,
}

impl SignedAckHeader {
    pub fn pack_and_sign(header: AckHeader, keypair: &Keypair) -> ChainResult<Self> {
        let (header_hash, signee, signature) = sign_header(&header, keypair)?;
        Ok(Self {
            header,
            header_hash,
            signee,
            signature,
        })
    }

    pub fn response_header(&self) -> &SignedResponseHeader {
        &self.header.response
    }

    /// Timestamp of the wrapped response, which keys the ack into a
    /// chain height.
    pub fn response_timestamp(&self) -> DateTime<Utc> {
        self.header.response.header.timestamp
    }

    pub fn verify(&self) -> ChainResult<()> {
        self.header.response.verify()?;
        verify_header(&self.header, &self.header_hash, &self.signee, &self.signature)
    }
}

fn sign_header<T: Serialize>(
    header: &T,
    keypair: &Keypair,
) -> ChainResult<(Hash, String, String)> {
    let header_hash = crypto::sha256(&bincode::serialize(header)?);
    let signature = crypto::sign_message(keypair, header_hash.as_bytes());
    Ok((
        header_hash,
        public_key_to_hex(&keypair.public),
        signature_to_hex(&signature),
    ))
}

fn verify_header<T: Serialize>(
    header: &T,
    header_hash: &Hash,
    signee: &str,
    signature: &str,
) -> ChainResult<()> {
    if crypto::sha256(&bincode::serialize(header)?) != *header_hash {
        return Err(ChainError::Crypto("header hash mismatch".into()));
    }
    let signee = public_key_from_hex(signee)?;
    let signature = signature_from_hex(signature)?;
    crypto::verify_signature(&signee, header_hash.as_bytes(), &signature)
}
