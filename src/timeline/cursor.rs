//! Opaque pagination cursors.
//!
//! A cursor is the ordering key of the last tweet a page returned, framed as
//! `version | ts (i64 BE) | id (u64 BE) | crc32 (BE)` and encoded with URL-safe
//! base64 without padding. Nothing but the key goes in, so cursors stay valid
//! across restarts and cache state.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::types::checksum::cursor_crc32;
use crate::types::{FeedError, FeedKey, Result, Timestamp, TweetId};

/// Current frame version.
pub const CURSOR_VERSION: u8 = 1;

const PAYLOAD_LEN: usize = 16;
const FRAME_LEN: usize = 1 + PAYLOAD_LEN + 4;
/// Encoded length of a well-formed frame; anything longer is rejected unread.
const MAX_ENCODED_LEN: usize = 28;

/// Encoded resume point handed to clients.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    /// The wire form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decodes the key this cursor points after.
    pub fn key(&self) -> Result<FeedKey> {
        decode_key(&self.0)
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<FeedKey> for Cursor {
    fn from(key: FeedKey) -> Self {
        encode(key.ts, key.id)
    }
}

impl FromStr for Cursor {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self> {
        decode_key(s)?;
        Ok(Cursor(s.to_owned()))
    }
}

/// Encodes a resume point.
pub fn encode(ts: Timestamp, id: TweetId) -> Cursor {
    let mut frame = [0u8; FRAME_LEN];
    frame[0] = CURSOR_VERSION;
    frame[1..9].copy_from_slice(&ts.0.to_be_bytes());
    frame[9..17].copy_from_slice(&id.0.to_be_bytes());
    let crc = cursor_crc32(CURSOR_VERSION, &frame[1..1 + PAYLOAD_LEN]);
    frame[17..].copy_from_slice(&crc.to_be_bytes());
    Cursor(URL_SAFE_NO_PAD.encode(frame))
}

/// Decodes a cursor string into its `(tweet_ts, tweet_id)` parts.
pub fn decode(text: &str) -> Result<(Timestamp, TweetId)> {
    let key = decode_key(text)?;
    Ok((key.ts, key.id))
}

/// Decodes a cursor string into a [`FeedKey`].
pub fn decode_key(text: &str) -> Result<FeedKey> {
    if text.is_empty() {
        return Err(FeedError::InvalidCursor("empty"));
    }
    if text.len() > MAX_ENCODED_LEN {
        return Err(FeedError::InvalidCursor("too long"));
    }
    let bytes = URL_SAFE_NO_PAD
        .decode(text)
        .map_err(|_| FeedError::InvalidCursor("not base64"))?;
    let frame: [u8; FRAME_LEN] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| FeedError::InvalidCursor("wrong length"))?;
    if frame[0] != CURSOR_VERSION {
        return Err(FeedError::InvalidCursor("unknown version"));
    }
    let payload = &frame[1..1 + PAYLOAD_LEN];
    let stored = u32::from_be_bytes([frame[17], frame[18], frame[19], frame[20]]);
    if cursor_crc32(frame[0], payload) != stored {
        return Err(FeedError::InvalidCursor("checksum mismatch"));
    }
    let mut ts = [0u8; 8];
    ts.copy_from_slice(&payload[..8]);
    let mut id = [0u8; 8];
    id.copy_from_slice(&payload[8..]);
    let id = u64::from_be_bytes(id);
    // Tweet ids live in a signed SQLite INTEGER column.
    if id > i64::MAX as u64 {
        return Err(FeedError::InvalidCursor("tweet id out of range"));
    }
    let ts = Timestamp(i64::from_be_bytes(ts));
    if !ts.fits_datetime() {
        return Err(FeedError::InvalidCursor("timestamp out of range"));
    }
    Ok(FeedKey::new(ts, TweetId(id)))
}
