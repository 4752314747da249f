pub mod bogus_insert;
pub mod demote;
pub mod fake_loop;
pub mod flatten;
pub mod pipeline;
pub mod string_obf;

use murk_core::Module;
use murk_utils::errors::TransformError;
use murk_utils::prng::XorShift32;
use murk_utils::reporter::Reporter;

/// Trait for IR obfuscation transforms.
pub trait Transform: Send + Sync {
    /// Returns the transform's name for logging and pipeline selection.
    fn name(&self) -> &'static str;
    /// Per-pass PRNG stream salt, XORed against the run's base seed so each
    /// pass owns an independent deterministic draw sequence.
    fn seed_salt(&self) -> u32;
    /// Applies the transform to the module, returning whether changes were
    /// made. Ineligible functions are skipped silently.
    fn apply(
        &self,
        module: &mut Module,
        rng: &mut XorShift32,
        reporter: &mut Reporter,
    ) -> Result<bool, TransformError>;
}
