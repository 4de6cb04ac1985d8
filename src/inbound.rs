use osc::OscMessage;

use crate::broadcast::{CHANNEL_IN, SYSTEM_ADDRESS_ROOT};
use crate::error::LookupError;

/// What an inbound message asks for.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// `{id}/in/{parameter}/{subchannel}` with one numeric argument.
    Sample {
        participant: String,
        parameter: String,
        subchannel: String,
        value: f64,
    },
    /// `brain/reset`
    Reset,
}

impl Inbound {
    /// The participant a message is addressed under, if it has more than one segment.
    pub fn sender(message: &OscMessage) -> Option<&str> {
        let segments = message.segments();
        match segments.as_slice() {
            [id, _, ..] if *id != SYSTEM_ADDRESS_ROOT => Some(*id),
            _ => None,
        }
    }

    pub fn classify(message: &OscMessage) -> Result<Self, LookupError> {
        let segments = message.segments();
        match segments.as_slice() {
            [root, "reset"] if *root == SYSTEM_ADDRESS_ROOT => Ok(Inbound::Reset),
            [id, channel, parameter, subchannel] => {
                if *channel != CHANNEL_IN {
                    return Err(LookupError::UnknownChannel(channel.to_string()));
                }
                let value = match message.args.as_slice() {
                    [arg] => arg.as_f64().ok_or(LookupError::NotNumeric)?,
                    args => return Err(LookupError::Arity(args.len())),
                };
                Ok(Inbound::Sample {
                    participant: id.to_string(),
                    parameter: parameter.to_string(),
                    subchannel: subchannel.to_string(),
                    value,
                })
            }
            _ => Err(LookupError::UnknownAddress(message.address.clone())),
        }
    }
}
