//! Useful constants for use within the engine.

/// The width in bits of an address.
pub const ADDRESS_WIDTH: u32 = 256;

/// The widest unsigned integer type the language supports, in bits.
pub const MAX_INTEGER_WIDTH: u32 = 128;

/// The maximum nesting depth of blocks and expressions that the parser will
/// accept before reporting an error instead of recursing further.
pub const MAX_NESTING_DEPTH: usize = 64;

/// The default step budget for each scanner pass.
pub const DEFAULT_PASS_FUEL: u64 = 1_000_000;

/// The default step budget for a single concrete execution.
pub const DEFAULT_EXECUTION_FUEL: u64 = 100_000;

/// The default maximum depth of nested internal calls during execution.
pub const DEFAULT_CALL_DEPTH: usize = 8;

/// The default number of paths the verifier explores per function before
/// giving up.
pub const DEFAULT_MAX_PATHS: usize = 512;

/// The default number of blocks the verifier will visit on a single path.
pub const DEFAULT_MAX_BLOCKS_PER_PATH: usize = 512;

/// The default number of times the verifier unrolls a loop.
pub const DEFAULT_LOOP_UNROLL: usize = 4;

/// The default step budget for verifying a single property.
pub const DEFAULT_VERIFIER_FUEL: u64 = 500_000;

/// The default number of candidate assignments the verifier tries when
/// searching for a counterexample.
pub const DEFAULT_WITNESS_ATTEMPTS: usize = 4096;

/// The default number of rounds the optimizer pipeline runs while looking for a
/// fixpoint.
pub const DEFAULT_OPTIMIZER_ROUNDS: usize = 64;

/// The number of instructions the reference machine executes per optimizer
/// probe.
pub const DEFAULT_PROBE_FUEL: u64 = 10_000;

/// The default timeout for remote completion requests, in milliseconds.
pub const DEFAULT_COMPLETION_TIMEOUT_MS: u64 = 2_000;

/// The environment variable holding the remote completion endpoint.
pub const ENV_AI_ENDPOINT: &str = "AURION_AI_ENDPOINT";

/// The environment variable holding the remote completion credential.
pub const ENV_AI_KEY: &str = "AURION_AI_KEY";

/// The environment variable holding the remote completion timeout in
/// milliseconds.
pub const ENV_AI_TIMEOUT_MS: &str = "AURION_AI_TIMEOUT_MS";

/// The number of times the simulator assumes each loop body runs when
/// computing worst-case gas.
pub const DEFAULT_SIMULATION_LOOP_BOUND: u64 = 16;

/// The chain whose gas schedule an analysis reports worst-case gas against.
pub const HOME_CHAIN: &str = "Aurlink VM";

/// The security score below which a contract is not ready for deployment.
pub const PASSING_SECURITY_SCORE: u8 = 70;
