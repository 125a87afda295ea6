use thiserror::Error;

use crate::flowgraph::{BlockId, InstrId};

macro_rules! invariant_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::InvariantViolation {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::InvariantViolation {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Every variant is a *fatal* condition: it means the flow graph handed to an
/// optimizer violated a structural invariant, or an optimizer was about to
/// make an unsound decision. Situations where an analysis merely lacks
/// information are never errors - the optimizers fall back to conservative
/// behavior (keep the instruction, assume aliasing, assume the slot is live)
/// and report nothing.
///
/// # Examples
///
/// ```rust,ignore
/// match ssaopt::passes::optimize_function(&mut graph, &env, &mut log) {
///     Ok(changed) => println!("optimized (changed: {changed})"),
///     Err(ssaopt::Error::InvariantViolation { message, file, line }) => {
///         eprintln!("broken graph: {} ({}:{})", message, file, line);
///     }
///     Err(e) => eprintln!("other error: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// A structural or soundness invariant of the flow graph was violated.
    ///
    /// This covers definitions unlinked while still referenced, use lists
    /// that disagree with operands, and alias verdicts attempting to
    /// downgrade. The error includes the source location where the
    /// violation was detected for debugging purposes.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of the violated invariant
    /// * `file` - Source file where the violation was detected
    /// * `line` - Source line where the violation was detected
    #[error("Invariant violated - {file}:{line}: {message}")]
    InvariantViolation {
        /// The message to be printed for the violation
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// A reachable block does not end in a terminator instruction.
    ///
    /// Every reachable block must be closed by `Goto`, `Branch`, `Return`
    /// or `Throw` before any analysis or pass runs.
    #[error("Block {0} has no terminator")]
    MissingTerminator(BlockId),

    /// An instruction references an operand outside the arena.
    ///
    /// Indicates the graph was assembled by hand and an identifier from a
    /// different graph leaked in.
    #[error("Instruction {0} is not part of this graph")]
    UnknownInstruction(InstrId),

    /// A catch entry's initial definition addresses an environment slot
    /// beyond the flattened environment.
    ///
    /// The synchronizer treats this as fatal rather than clamping: an
    /// out-of-range index means the scope flattening and the graph
    /// disagree about the frame layout.
    #[error("Environment index {index} out of range (environment has {len} slots)")]
    EnvIndexOutOfRange {
        /// The offending environment index
        index: usize,
        /// The number of flattened environment slots
        len: usize,
    },
}
