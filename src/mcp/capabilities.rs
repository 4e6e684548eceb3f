//! Server capability model
//!
//! Servers advertise each capability either as a plain boolean or as a
//! descriptor object (`"resources": {"supportedTypes": [...]}`). Each known
//! capability is kept as a presence flag plus an optional typed descriptor;
//! unknown keys land in `extensions`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use super::context::ContextItem;

/// Untyped descriptor for capabilities whose shape this client does not inspect
pub type Descriptor = Map<String, Value>;

/// One advertised capability
#[derive(Debug, Clone, PartialEq)]
pub struct Capability<D> {
    /// Whether the server advertises the capability at all
    pub enabled: bool,
    /// Descriptor object, when the server sent one instead of a boolean
    pub descriptor: Option<D>,
}

impl<D> Capability<D> {
    pub fn flag(enabled: bool) -> Self {
        Self {
            enabled,
            descriptor: None,
        }
    }

    pub fn described(descriptor: D) -> Self {
        Self {
            enabled: true,
            descriptor: Some(descriptor),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum WireCapability<D> {
    Flag(bool),
    Descriptor(D),
}

impl<'de, D> Deserialize<'de> for Capability<D>
where
    D: Deserialize<'de>,
{
    fn deserialize<De>(deserializer: De) -> Result<Self, De::Error>
    where
        De: Deserializer<'de>,
    {
        Ok(match WireCapability::<D>::deserialize(deserializer)? {
            WireCapability::Flag(enabled) => Capability::flag(enabled),
            WireCapability::Descriptor(descriptor) => Capability::described(descriptor),
        })
    }
}

impl<D> Serialize for Capability<D>
where
    D: Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match (&self.descriptor, self.enabled) {
            (Some(descriptor), true) => descriptor.serialize(serializer),
            _ => serializer.serialize_bool(self.enabled),
        }
    }
}

/// Descriptor of the `resources` capability
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesDescriptor {
    /// Context item types the server accepts; absent means every type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supported_types: Option<Vec<String>>,
    /// Supports resource subscriptions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscribe: Option<bool>,
    /// Emits list-changed notifications
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
    /// Remaining server-specific fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Capabilities advertised by a server in its `initialize` result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Capability<ResourcesDescriptor>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<Capability<Descriptor>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Capability<Descriptor>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling: Option<Capability<Descriptor>>,
    /// Server-specific capabilities
    #[serde(flatten)]
    pub extensions: Map<String, Value>,
}

impl ServerCapabilities {
    /// Whether the server accepts context resources at all
    pub fn supports_resources(&self) -> bool {
        self.resources.as_ref().is_some_and(|c| c.enabled)
    }

    /// Types declared in `resources.supportedTypes`, if the server restricts them
    pub fn supported_types(&self) -> Option<&[String]> {
        self.resources
            .as_ref()
            .filter(|c| c.enabled)
            .and_then(|c| c.descriptor.as_ref())
            .and_then(|d| d.supported_types.as_deref())
    }

    /// Whether a named capability is advertised, including extensions
    pub fn has(&self, name: &str) -> bool {
        match name {
            "resources" => self.supports_resources(),
            "prompts" => self.prompts.as_ref().is_some_and(|c| c.enabled),
            "tools" => self.tools.as_ref().is_some_and(|c| c.enabled),
            "sampling" => self.sampling.as_ref().is_some_and(|c| c.enabled),
            other => match self.extensions.get(other) {
                None | Some(Value::Null) | Some(Value::Bool(false)) => false,
                Some(_) => true,
            },
        }
    }

    /// Whether this server should receive the given item
    pub fn accepts(&self, item: &ContextItem) -> bool {
        if !self.supports_resources() {
            return false;
        }
        match self.supported_types() {
            Some(types) => types.iter().any(|t| t == item.kind().as_str()),
            None => true,
        }
    }

    /// The subset of `items` this server should receive, in input order.
    ///
    /// Servers without the `resources` capability receive nothing; servers that
    /// declare `supportedTypes` receive only those types.
    pub fn relevant_items(&self, items: &[ContextItem]) -> Vec<ContextItem> {
        items
            .iter()
            .filter(|item| self.accepts(item))
            .cloned()
            .collect()
    }
}
