pub mod block;
pub mod codec;
pub mod hash;
pub mod proposal;
pub mod qc;
pub mod validator;
pub mod vote;

pub use block::{Block, BlockError, BlockHeader};
pub use hash::{Address, Hash};
pub use proposal::Proposal;
pub use qc::{fork_choice, QcError, QuorumCertificate};
pub use validator::{Validator, ValidatorSet, ValidatorSetError};
pub use vote::{is_equivocation, EvidenceKind, SlashingEvidence, TimeoutMessage, Vote};
