// Command - Single-character bridge command codes

use serde::{Deserialize, Serialize};
use std::fmt;

/// Commands understood by the bridge firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    /// `v <level>`: set firmware log verbosity
    SetVerbosity,
    /// `m`: manual pairing mode
    ManualPairing,
    /// `k`: only report known transmitters
    KnownOnly,
    /// `u`: report every transmitter heard
    Promiscuous,
    /// `n <id>`: register a TX
    AddTx,
    /// `N <id>`: register a TRX
    AddTrx,
    /// `r <id>`: forget a TX
    DeleteTx,
    /// `R <id>`: forget a TRX
    DeleteTrx,
    /// `d`: forget every TX
    DeleteAllTx,
    /// `D`: forget every TRX
    DeleteAllTrx,
    /// `s <count>`: declare how many TXs follow
    SetTxCount,
    /// `S <count>`: declare how many TRXs follow
    SetTrxCount,
    /// `p <id>`: pair with a TRX
    Pair,
    /// `t`: query the free-running millisecond counter
    QueryTime,
    /// `0 <id>`: switch a TRX off
    SwitchOff,
    /// `1 <id>`: switch a TRX on
    SwitchOn,
}

impl Command {
    /// The byte written on the wire
    pub fn code(&self) -> char {
        match self {
            Self::SetVerbosity => 'v',
            Self::ManualPairing => 'm',
            Self::KnownOnly => 'k',
            Self::Promiscuous => 'u',
            Self::AddTx => 'n',
            Self::AddTrx => 'N',
            Self::DeleteTx => 'r',
            Self::DeleteTrx => 'R',
            Self::DeleteAllTx => 'd',
            Self::DeleteAllTrx => 'D',
            Self::SetTxCount => 's',
            Self::SetTrxCount => 'S',
            Self::Pair => 'p',
            Self::QueryTime => 't',
            Self::SwitchOff => '0',
            Self::SwitchOn => '1',
        }
    }

    /// Look a command up by its wire code
    pub fn from_code(code: char) -> Option<Self> {
        let command = match code {
            'v' => Self::SetVerbosity,
            'm' => Self::ManualPairing,
            'k' => Self::KnownOnly,
            'u' => Self::Promiscuous,
            'n' => Self::AddTx,
            'N' => Self::AddTrx,
            'r' => Self::DeleteTx,
            'R' => Self::DeleteTrx,
            'd' => Self::DeleteAllTx,
            'D' => Self::DeleteAllTrx,
            's' => Self::SetTxCount,
            'S' => Self::SetTrxCount,
            'p' => Self::Pair,
            't' => Self::QueryTime,
            '0' => Self::SwitchOff,
            '1' => Self::SwitchOn,
            _ => return None,
        };
        Some(command)
    }

    /// Whether the firmware expects a parameter line after the ACK
    pub fn takes_param(&self) -> bool {
        !matches!(
            self,
            Self::ManualPairing
                | Self::KnownOnly
                | Self::Promiscuous
                | Self::DeleteAllTx
                | Self::DeleteAllTrx
                | Self::QueryTime
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
