//! Properties Document Scanner
//!
//! Walks the top-level entries of a device properties (twin) document and
//! hands back the raw JSON span of a named subcomponent without copying it.
//! Entries that are not the target are consumed whole by the parser, so the
//! cursor never lands inside a skipped subtree, however deep it nests.

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::borrow::Cow;
use std::fmt;
use tracing::debug;

use crate::engine::error::ParseError;
use crate::engine::transport::MessageId;

/// Component written by the update service
pub const DEVICE_UPDATE_COMPONENT: &str = "deviceUpdate";

const VERSION_KEY: &str = "$version";
const DESIRED_KEY: &str = "desired";

/// What kind of properties message was received
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertiesKind {
    /// Full document returned by a GET: `{"desired": {...}, "reported": {...}}`
    Full,
    /// Writable-properties patch pushed by the service
    WritablePatch,
    /// Response to a reported-properties update; carries no document
    ReportedResponse,
}

/// An owned, inbound properties message
#[derive(Debug, Clone, PartialEq)]
pub struct PropertiesResponse {
    pub kind: PropertiesKind,
    pub request_id: Option<MessageId>,
    pub payload: Vec<u8>,
}

impl PropertiesResponse {
    pub fn new(kind: PropertiesKind, request_id: Option<MessageId>, payload: Vec<u8>) -> Self {
        Self {
            kind,
            request_id,
            payload,
        }
    }

    pub fn document(&self) -> Result<PropertiesDocument<'_>, ParseError> {
        PropertiesDocument::parse(self.kind, &self.payload)
    }
}

/// Zero-copy view of a single subcomponent
#[derive(Debug, Clone, Copy)]
pub struct ComponentPayload<'a> {
    pub name: &'a str,
    raw: &'a RawValue,
}

impl<'a> ComponentPayload<'a> {
    /// The component's JSON text, as a slice of the original document
    pub fn raw_json(&self) -> &'a str {
        self.raw.get()
    }

    pub fn deserialize<T: Deserialize<'a>>(&self, context: &'static str) -> Result<T, ParseError> {
        serde_json::from_str(self.raw.get()).map_err(|e| ParseError::json(context, e))
    }
}

/// Ordered top-level entries of one JSON object
struct Entries<'a>(Vec<(Cow<'a, str>, &'a RawValue)>);

#[derive(Deserialize)]
struct BorrowedKey<'a>(#[serde(borrow)] Cow<'a, str>);

impl<'de> Deserialize<'de> for Entries<'de> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = Entries<'de>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::new();
                while let Some(BorrowedKey(key)) = map.next_key()? {
                    // Reading the value as a RawValue consumes the entire subtree
                    let value: &'de RawValue = map.next_value()?;
                    entries.push((key, value));
                }
                Ok(Entries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

/// A parsed, versioned properties document
#[derive(Debug, Default)]
pub struct PropertiesDocument<'a> {
    version: Option<u32>,
    entries: Vec<(Cow<'a, str>, &'a RawValue)>,
}

impl<'a> PropertiesDocument<'a> {
    pub fn parse(kind: PropertiesKind, bytes: &'a [u8]) -> Result<Self, ParseError> {
        const CONTEXT: &str = "properties document";

        if kind == PropertiesKind::ReportedResponse || bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }

        let Entries(top) = serde_json::from_slice(bytes).map_err(|e| ParseError::json(CONTEXT, e))?;

        let entries = match kind {
            PropertiesKind::Full => {
                let desired = top
                    .into_iter()
                    .find(|(key, _)| key == DESIRED_KEY)
                    .map(|(_, value)| value)
                    .ok_or_else(|| ParseError::missing(CONTEXT, DESIRED_KEY))?;
                let Entries(inner) = serde_json::from_str(desired.get())
                    .map_err(|e| ParseError::json(CONTEXT, e))?;
                inner
            }
            _ => top,
        };

        let version = match entries.iter().find(|(key, _)| key == VERSION_KEY) {
            Some((_, raw)) => Some(serde_json::from_str::<u32>(raw.get()).map_err(|_| {
                ParseError::UnexpectedShape {
                    context: CONTEXT,
                    expected: "an unsigned integer $version",
                }
            })?),
            None => None,
        };

        Ok(Self { version, entries })
    }

    /// The document's `$version` counter, when present
    pub fn version(&self) -> Option<u32> {
        self.version
    }

    /// Names of every component-like entry, in document order
    pub fn component_names(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .map(|(key, _)| key.as_ref())
            .filter(|key| !key.starts_with('$'))
    }

    pub fn component(&self, name: &str) -> Option<ComponentPayload<'_>> {
        for (key, raw) in &self.entries {
            if key.starts_with('$') {
                continue;
            }
            if key != name {
                debug!(component = %key, "Skipping component");
                continue;
            }
            if raw.get().trim() == "null" {
                debug!(component = %key, "Component present but null");
                return None;
            }
            return Some(ComponentPayload { name: key, raw });
        }
        None
    }
}

/// Find `target` among the document's subcomponents.
///
/// Not finding it is not an error; the caller keeps waiting for the service
/// to deliver it.
pub fn scan<'d>(document: &'d PropertiesDocument<'_>, target: &str) -> Option<ComponentPayload<'d>> {
    document.component(target)
}
