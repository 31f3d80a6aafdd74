use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use std::fmt;

use super::encoding::{self, EncodingError};

/// A blockchain address. The core performs no format validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct Address(pub String);

impl Address {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Address(s.to_string())
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        Address(s)
    }
}

/// A value transfer between two addresses
///
/// Immutable once constructed: fields are only reachable through accessors.
/// Two transactions with the same fields are the same transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Transaction {
    /// Sender's address
    #[serde(rename = "sender_blockchain_address")]
    sender: Address,

    /// Recipient's address
    #[serde(rename = "recipient_blockchain_address")]
    recipient: Address,

    /// Amount being transferred. Sign and magnitude are not checked here.
    value: f64,
}

impl Transaction {
    /// Creates a new transaction
    ///
    /// # Arguments
    ///
    /// * `sender` - The address of the sender
    /// * `recipient` - The address of the recipient
    /// * `value` - The amount to transfer
    pub fn new(sender: impl Into<Address>, recipient: impl Into<Address>, value: f64) -> Self {
        Transaction {
            sender: sender.into(),
            recipient: recipient.into(),
            value,
        }
    }

    pub fn sender(&self) -> &Address {
        &self.sender
    }

    pub fn recipient(&self) -> &Address {
        &self.recipient
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// Canonical bytes of this transaction
    pub fn encode(&self) -> Result<Vec<u8>, EncodingError> {
        encoding::encode_transaction(self)
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", "-".repeat(40))?;
        writeln!(f, "sender_blockchain_address     {}", self.sender)?;
        writeln!(f, "recipient_blockchain_address  {}", self.recipient)?;
        writeln!(f, "value                         {:.1}", self.value)
    }
}
