//! Parameterized command channel groups.
//!
//! Hardware commands on this control-network family are composed by writing
//! each parameter to its own channel and then firing a shared apply/trigger
//! record. The types here cover the parameter half: a command channel group
//! bundles a controller's telltale with N typed parameter channels, and each
//! `set_param` call produces a verified single write. Writes accumulate in a
//! [`ParameterList`] and are flushed as one verified batch by
//! [`ParameterList::compile`] before the trigger step executes.
//!
//! Duplicate writes to the same parameter are intentionally not deduplicated:
//! some record fields are commands rather than state, so both writes are
//! issued in program order.

use crate::channel::Channel;
use crate::codec::EpicsCodec;
use crate::error::{EpicsError, EpicsResult};
use crate::system::TelltaleChannel;
use crate::transport::WireValue;
use crate::verified::{write_channel, VerifiedAction};

/// Control directive written to a CAD record's direction field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CadDirective {
    /// Mark the record for inclusion in the next apply.
    Mark,
    /// Clear a previous mark.
    Clear,
    /// Validate the record's inputs without starting.
    Preset,
    /// Start the marked action.
    Start,
    /// Cancel an in-flight action.
    Stop,
}

impl CadDirective {
    fn index(self) -> u16 {
        match self {
            CadDirective::Mark => 0,
            CadDirective::Clear => 1,
            CadDirective::Preset => 2,
            CadDirective::Start => 3,
            CadDirective::Stop => 4,
        }
    }
}

impl EpicsCodec for CadDirective {
    fn encode(&self) -> WireValue {
        WireValue::Enum(self.index())
    }

    fn decode(value: &WireValue) -> EpicsResult<Self> {
        let index = match value {
            WireValue::Enum(v) => i64::from(*v),
            WireValue::Int(v) => i64::from(*v),
            other => {
                return Err(EpicsError::Conversion(format!(
                    "not a CAD directive: {other}"
                )))
            }
        };
        match index {
            0 => Ok(CadDirective::Mark),
            1 => Ok(CadDirective::Clear),
            2 => Ok(CadDirective::Preset),
            3 => Ok(CadDirective::Start),
            4 => Ok(CadDirective::Stop),
            other => Err(EpicsError::Conversion(format!(
                "CAD directive index out of range: {other}"
            ))),
        }
    }
}

/// Ordered list of pending verified writes for one command.
#[derive(Default)]
pub struct ParameterList {
    writes: Vec<VerifiedAction<()>>,
}

impl ParameterList {
    /// Empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a verified write. Insertion order is preserved.
    pub fn push(&mut self, write: VerifiedAction<()>) {
        self.writes.push(write);
    }

    /// Number of pending writes.
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Whether no writes are pending.
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Flush into one verified batch: checks unioned, writes concatenated.
    ///
    /// All writes are verified together before any of them is issued.
    pub fn compile(self) -> VerifiedAction<()> {
        self.writes
            .into_iter()
            .fold(VerifiedAction::pure(()), VerifiedAction::then)
    }
}

/// A command with no parameters: only a CAD direction channel to mark.
pub struct ParameterlessCommandChannels {
    telltale: TelltaleChannel,
    dir: Channel<CadDirective>,
}

impl ParameterlessCommandChannels {
    /// Bundle a direction channel with its controller's telltale.
    pub fn new(telltale: TelltaleChannel, dir: Channel<CadDirective>) -> Self {
        Self { telltale, dir }
    }

    /// Verified write of [`CadDirective::Mark`] to the direction channel.
    pub fn mark(&self) -> VerifiedAction<()> {
        write_channel(&self.telltale, &self.dir, CadDirective::Mark)
    }

    /// The underlying direction channel.
    pub fn dir_channel(&self) -> &Channel<CadDirective> {
        &self.dir
    }
}

macro_rules! command_channels {
    ($(#[$doc:meta])* $name:ident => $( ($field:ident, $ty:ident, $setter:ident) ),+ ) => {
        $(#[$doc])*
        pub struct $name<$($ty: EpicsCodec),+> {
            telltale: TelltaleChannel,
            $( $field: Channel<$ty>, )+
        }

        impl<$($ty: EpicsCodec),+> $name<$($ty),+> {
            /// Bundle the parameter channels with their controller's telltale.
            #[allow(clippy::too_many_arguments)]
            pub fn new(telltale: TelltaleChannel, $( $field: Channel<$ty> ),+) -> Self {
                Self { telltale, $( $field ),+ }
            }

            $(
                /// Verified single write of this parameter.
                pub fn $setter(&self, value: $ty) -> VerifiedAction<()> {
                    write_channel(&self.telltale, &self.$field, value)
                }
            )+
        }
    };
}

command_channels!(
    /// Command channel group with one typed parameter.
    Command1Channels => (param1, A, set_param1)
);
command_channels!(
    /// Command channel group with two typed parameters.
    Command2Channels => (param1, A, set_param1), (param2, B, set_param2)
);
command_channels!(
    /// Command channel group with three typed parameters.
    Command3Channels => (param1, A, set_param1), (param2, B, set_param2),
        (param3, C, set_param3)
);
command_channels!(
    /// Command channel group with four typed parameters.
    Command4Channels => (param1, A, set_param1), (param2, B, set_param2),
        (param3, C, set_param3), (param4, D, set_param4)
);
command_channels!(
    /// Command channel group with five typed parameters.
    Command5Channels => (param1, A, set_param1), (param2, B, set_param2),
        (param3, C, set_param3), (param4, D, set_param4), (param5, E, set_param5)
);
command_channels!(
    /// Command channel group with six typed parameters.
    Command6Channels => (param1, A, set_param1), (param2, B, set_param2),
        (param3, C, set_param3), (param4, D, set_param4), (param5, E, set_param5),
        (param6, F, set_param6)
);
command_channels!(
    /// Command channel group with seven typed parameters.
    Command7Channels => (param1, A, set_param1), (param2, B, set_param2),
        (param3, C, set_param3), (param4, D, set_param4), (param5, E, set_param5),
        (param6, F, set_param6), (param7, G, set_param7)
);
