/// Pipeline driver: maps presets to ordered pass sequences and runs them.
///
/// Order matters: `string-obf` runs first so it sees the still-clean globals,
/// `cff` runs last so it flattens whatever CFG the earlier passes produced.
/// After every pass the module verifier runs; a violation aborts the run so
/// invalid IR is never written out. The counter report is re-emitted at the
/// end of each pass, last writer wins.
use crate::bogus_insert::BogusInsert;
use crate::fake_loop::FakeLoop;
use crate::flatten::Flatten;
use crate::string_obf::StringObf;
use crate::Transform;
use async_trait::async_trait;
use murk_core::verifier::verify_module;
use murk_core::Module;
use murk_utils::config::ObfConfig;
use murk_utils::errors::ObfuscateError;
use murk_utils::prng::XorShift32;
use murk_utils::reporter::Reporter;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

/// Configuration for one obfuscation run.
pub struct ObfuscationConfig {
    /// Seed, ratios, cycle counts and the report sink.
    pub cfg: ObfConfig,
    /// Ordered transforms to apply each cycle.
    pub transforms: Vec<Box<dyn Transform>>,
}

impl Default for ObfuscationConfig {
    fn default() -> Self {
        Self {
            cfg: ObfConfig::default(),
            transforms: Vec::new(),
        }
    }
}

impl std::fmt::Debug for ObfuscationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObfuscationConfig")
            .field("cfg", &self.cfg)
            .field(
                "transforms",
                &format!("{} transforms", self.transforms.len()),
            )
            .finish()
    }
}

/// Result summary of an obfuscation run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSummary {
    /// Names of transforms that were applied, in order, one entry per cycle.
    pub passes_applied: Vec<String>,
    /// Seed actually used (resolved when the configured seed was 0).
    pub seed_used: u32,
    /// Number of whole-sequence repetitions.
    pub cycles: u32,
    /// Block count delta across the run.
    pub blocks_delta: i64,
    /// Instruction count delta across the run.
    pub instructions_delta: i64,
    /// Final counter values.
    pub counters: BTreeMap<String, u64>,
}

/// Builds the pass sequence for a preset name.
pub fn preset_passes(
    preset: &str,
    cfg: &ObfConfig,
) -> Result<Vec<Box<dyn Transform>>, ObfuscateError> {
    let list = match preset {
        "light" => "string-obf",
        "balanced" => "string-obf,bogus-insert,fake-loop",
        "aggressive" => "string-obf,bogus-insert,fake-loop,cff",
        other => return Err(ObfuscateError::InvalidPreset(other.to_string())),
    };
    build_passes(list, cfg)
}

/// Builds a pass sequence from a comma-separated list of pass names.
/// `string-obf` is queued `string_intensity` times per mention.
pub fn build_passes(
    list: &str,
    cfg: &ObfConfig,
) -> Result<Vec<Box<dyn Transform>>, ObfuscateError> {
    let mut passes: Vec<Box<dyn Transform>> = Vec::new();
    for name in list.split(',').filter(|s| !s.is_empty()) {
        match name.trim() {
            "string-obf" => {
                for _ in 0..cfg.string_intensity.max(1) {
                    passes.push(Box::new(StringObf));
                }
            }
            "bogus-insert" => passes.push(Box::new(BogusInsert::new(cfg.bogus_ratio))),
            "fake-loop" => passes.push(Box::new(FakeLoop)),
            "cff" => passes.push(Box::new(Flatten)),
            other => return Err(ObfuscateError::InvalidPass(other.to_string())),
        }
    }
    Ok(passes)
}

/// Trait for running an ordered sequence of transforms over a module.
#[async_trait]
pub trait Pipeline {
    async fn run(
        &self,
        module: &mut Module,
        config: &ObfuscationConfig,
        reporter: &mut Reporter,
    ) -> Result<PipelineSummary, ObfuscateError>;
}

/// Default implementation of the Pipeline trait.
pub struct DefaultPipeline;

#[async_trait]
impl Pipeline for DefaultPipeline {
    async fn run(
        &self,
        module: &mut Module,
        config: &ObfuscationConfig,
        reporter: &mut Reporter,
    ) -> Result<PipelineSummary, ObfuscateError> {
        let seed = config.cfg.resolve_seed();
        let before = module.stats();
        let mut passes_applied = Vec::new();

        for cycle in 0..config.cfg.cycles.max(1) {
            for pass in &config.transforms {
                let pre = module.stats();
                // Each pass owns a salted stream of the run seed, re-derived
                // per invocation so cycles replay the same sequence.
                let mut rng = XorShift32::new(seed ^ pass.seed_salt());
                let changed = pass.apply(module, &mut rng, reporter)?;
                verify_module(module).map_err(|e| ObfuscateError::InvariantViolation {
                    pass: pass.name().to_string(),
                    source: e,
                })?;
                let post = module.stats();
                info!(
                    "{:>12} cycle {} {} blocks {:+}, instructions {:+}",
                    pass.name(),
                    cycle + 1,
                    if changed { "✓" } else { "×" },
                    post.blocks as i64 - pre.blocks as i64,
                    post.instructions as i64 - pre.instructions as i64,
                );
                reporter.emit();
                passes_applied.push(pass.name().to_string());
            }
        }

        let after = module.stats();
        Ok(PipelineSummary {
            passes_applied,
            seed_used: seed,
            cycles: config.cfg.cycles.max(1),
            blocks_delta: after.blocks as i64 - before.blocks as i64,
            instructions_delta: after.instructions as i64 - before.instructions as i64,
            counters: reporter
                .counters()
                .iter()
                .map(|(&k, &v)| (k.to_string(), v))
                .collect(),
        })
    }
}

/// Convenience function to run the default pipeline.
pub async fn run(
    module: &mut Module,
    config: &ObfuscationConfig,
    reporter: &mut Reporter,
) -> Result<PipelineSummary, ObfuscateError> {
    DefaultPipeline.run(module, config, reporter).await
}
