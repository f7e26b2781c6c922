//! Error types for script evaluation and transaction validation

use std::borrow::Cow;
use thiserror::Error;

use crate::stream::StreamError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("bad script: {0}")]
    BadScript(Cow<'static, str>),

    #[error("bad der: {0}")]
    BadDer(Cow<'static, str>),

    #[error("bad public key: {0}")]
    BadPublicKey(Cow<'static, str>),

    #[error("bad private key: {0}")]
    BadPrivateKey(Cow<'static, str>),

    #[error("bad hex: {0}")]
    InvalidHex(Cow<'static, str>),

    #[error("bad config: {0}")]
    InvalidConfig(Cow<'static, str>),

    #[error("hash input too large: {len} bytes exceeds limit of {max}")]
    HashInputTooLarge { len: usize, max: usize },

    #[error("Script execution failed: {0}")]
    ScriptExecution(#[from] ScriptError),

    #[error("Transaction validation failed: {0}")]
    TransactionValidation(Cow<'static, str>),

    #[error(
        "missing previous output information for input {index}\n\n\
         Hint: attach the spent output with Input::with_output(output)"
    )]
    MissingPreviousOutput { index: usize },

    #[error("transaction finalized")]
    TransactionFinalized,

    #[error("change output already added")]
    ChangeOutputAlreadyAdded,

    #[error("bad satoshis: {0}")]
    InvalidSatoshis(u64),

    #[error("Invalid input index: {0}")]
    InvalidInputIndex(usize),
}

/// Failures raised while a script runs.
///
/// The interpreter never returns these directly; they end up in
/// [`VmResult::error`](crate::interpreter::VmResult).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("non-push data in unlock script")]
    NonPushUnlockScript,

    #[error("stack empty")]
    StackEmpty,

    #[error("alt stack empty")]
    AltStackEmpty,

    #[error("ELSE found without matching IF")]
    UnmatchedElse,

    #[error("ENDIF found without matching IF")]
    UnmatchedEndif,

    #[error("ENDIF missing")]
    MissingEndif,

    #[error("top of stack is false")]
    FalseStackTop,

    /// `OP_VERIFY`, `OP_EQUALVERIFY`, `OP_NUMEQUALVERIFY` and the signature
    /// `*VERIFY` variants.
    #[error("{0} failed")]
    Verify(&'static str),

    #[error("{0} failed, out of range")]
    OutOfRange(&'static str),

    #[error("{0} failed, different sizes")]
    DifferentSizes(&'static str),

    #[error("{0} failed, n negative")]
    NegativeShift(&'static str),

    #[error("{0} failed, divide by 0")]
    DivideByZero(&'static str),

    #[error("reserved opcode: {0}")]
    ReservedOpcode(u8),

    /// A decoder called from inside the VM rejected its input
    /// (script chunks, public key, DER signature, hash input size).
    #[error("{0}")]
    Malformed(Box<ConsensusError>),
}

impl From<ConsensusError> for ScriptError {
    fn from(err: ConsensusError) -> Self {
        match err {
            ConsensusError::ScriptExecution(inner) => inner,
            other => ScriptError::Malformed(Box::new(other)),
        }
    }
}

impl From<StreamError> for ScriptError {
    fn from(err: StreamError) -> Self {
        ScriptError::Malformed(Box::new(ConsensusError::Stream(err)))
    }
}

pub type Result<T> = std::result::Result<T, ConsensusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_error_messages() {
        assert_eq!(ScriptError::Verify("OP_VERIFY").to_string(), "OP_VERIFY failed");
        assert_eq!(
            ScriptError::OutOfRange("OP_PICK").to_string(),
            "OP_PICK failed, out of range"
        );
        assert_eq!(ScriptError::ReservedOpcode(186).to_string(), "reserved opcode: 186");
    }

    #[test]
    fn test_malformed_wraps_decoder_error() {
        let err: ScriptError = ConsensusError::BadDer("bad tag".into()).into();
        assert_eq!(err.to_string(), "bad der: bad tag");

        // Script errors passed through a ConsensusError come back unwrapped
        let err: ScriptError = ConsensusError::ScriptExecution(ScriptError::StackEmpty).into();
        assert_eq!(err, ScriptError::StackEmpty);
    }

    #[test]
    fn test_missing_output_hint() {
        let msg = ConsensusError::MissingPreviousOutput { index: 2 }.to_string();
        assert!(msg.contains("input 2"));
        assert!(msg.contains("Hint"));
    }
}
