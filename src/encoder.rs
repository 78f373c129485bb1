//! MessagePack encoding of forward-protocol records.
//!
//! Each record is a self-delimiting array `[tag, time, payload]`, so frames
//! can be concatenated on the stream and decoded back to back by the
//! collector without any length prefix.

use std::{borrow::Cow, fmt::Display};

use rmp::encode;
use rmp_serde::Serializer;
use serde::Serialize;

use crate::{
    error::{EncodeError, SenderError},
    time_value::{EVENT_TIME_EXT_TYPE, EVENT_TIME_LEN, TimeValue},
};

fn header_error(err: impl Display) -> EncodeError {
    EncodeError::Header(err.to_string())
}

/// Apply the optional prefix to `label`, rejecting an empty result.
///
/// With a prefix, `label` becomes `prefix.label`, or just `prefix` when the
/// label is empty.
pub fn resolve_tag<'a>(
    prefix: Option<&'a str>,
    label: &'a str,
) -> Result<Cow<'a, str>, SenderError> {
    match (prefix.filter(|p| !p.is_empty()), label.is_empty()) {
        (Some(prefix), false) => Ok(Cow::Owned(format!("{prefix}.{label}"))),
        (Some(prefix), true) => Ok(Cow::Borrowed(prefix)),
        (None, false) => Ok(Cow::Borrowed(label)),
        (None, true) => Err(SenderError::EmptyTag),
    }
}

/// Serialise one record into a standalone MessagePack frame.
pub fn encode_record<T>(tag: &str, time: TimeValue, payload: &T) -> Result<Vec<u8>, EncodeError>
where
    T: Serialize + ?Sized,
{
    let mut buf = Vec::with_capacity(64 + tag.len());
    encode::write_array_len(&mut buf, 3).map_err(header_error)?;
    encode::write_str(&mut buf, tag).map_err(header_error)?;
    match time {
        TimeValue::Seconds(seconds) => {
            encode::write_uint(&mut buf, seconds).map_err(header_error)?;
        }
        TimeValue::EventTime(event_time) => {
            encode::write_ext_meta(&mut buf, EVENT_TIME_LEN, EVENT_TIME_EXT_TYPE)
                .map_err(header_error)?;
            buf.extend_from_slice(&event_time.to_bytes());
        }
    }
    payload.serialize(&mut Serializer::new(&mut buf).with_struct_map())?;
    Ok(buf)
}
