// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Payload Codecs
//!
//! Two serialization strategies convert typed values to message bodies:
//! [`JsonCodec`] (self-describing text, `application/json`) and
//! [`BincodeCodec`] (compact binary, only read by this codebase). The
//! content-type tag on each message names the codec that produced it, and
//! [`ContentType`] maps a tag back to its codec on the consuming side.

use crate::errors::AmqpError;
use serde::{de::DeserializeOwned, Serialize};

/// Content type of JSON encoded messages
pub const JSON_CONTENT_TYPE: &str = "application/json";
/// Content type of bincode encoded messages
pub const BINCODE_CONTENT_TYPE: &str = "application/x-bincode";

/// Converts values to bytes and back.
pub trait Codec: Send + Sync {
    /// Short identifier reported in errors and logs.
    fn name(&self) -> &'static str;

    /// Tag stored in the `content_type` message property.
    fn content_type(&self) -> &'static str;

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, AmqpError>;

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, AmqpError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn content_type(&self) -> &'static str {
        JSON_CONTENT_TYPE
    }

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, AmqpError> {
        serde_json::to_vec(value).map_err(|e| encode_error(self, e))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, AmqpError> {
        serde_json::from_slice(bytes).map_err(|e| decode_error(self, e, bytes))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl Codec for BincodeCodec {
    fn name(&self) -> &'static str {
        "bincode"
    }

    fn content_type(&self) -> &'static str {
        BINCODE_CONTENT_TYPE
    }

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, AmqpError> {
        bincode::serialize(value).map_err(|e| encode_error(self, e))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, AmqpError> {
        bincode::deserialize(bytes).map_err(|e| decode_error(self, e, bytes))
    }
}

fn encode_error(codec: &impl Codec, err: impl ToString) -> AmqpError {
    AmqpError::EncodeError {
        codec: codec.name().to_owned(),
        reason: err.to_string(),
    }
}

fn decode_error(codec: &impl Codec, err: impl ToString, bytes: &[u8]) -> AmqpError {
    AmqpError::DecodeError {
        codec: codec.name().to_owned(),
        reason: err.to_string(),
        raw: bytes.to_vec(),
    }
}

/// Codec selector, chosen per subscription or publish and carried on the wire
/// as the content-type tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ContentType {
    #[default]
    Json,
    Bincode,
}

impl ContentType {
    /// Resolves a content-type property to a codec.
    ///
    /// MIME parameters (`; charset=utf-8`) and letter case are ignored.
    /// Returns `None` for tags no codec produces.
    pub fn from_content_type(tag: &str) -> Option<ContentType> {
        let essence = tag.split(';').next().unwrap_or_default().trim();

        if essence.eq_ignore_ascii_case(JSON_CONTENT_TYPE) {
            Some(ContentType::Json)
        } else if essence.eq_ignore_ascii_case(BINCODE_CONTENT_TYPE) {
            Some(ContentType::Bincode)
        } else {
            None
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ContentType::Json => JsonCodec.name(),
            ContentType::Bincode => BincodeCodec.name(),
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ContentType::Json => JsonCodec.content_type(),
            ContentType::Bincode => BincodeCodec.content_type(),
        }
    }

    pub fn encode<T: Serialize + ?Sized>(self, value: &T) -> Result<Vec<u8>, AmqpError> {
        match self {
            ContentType::Json => JsonCodec.encode(value),
            ContentType::Bincode => BincodeCodec.encode(value),
        }
    }

    pub fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T, AmqpError> {
        match self {
            ContentType::Json => JsonCodec.decode(bytes),
            ContentType::Bincode => BincodeCodec.decode(bytes),
        }
    }
}
