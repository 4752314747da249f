//! Concrete end-to-end scenarios: parse a module, run a preset pipeline,
//! interpret original and transformed modules side by side, and check the
//! counter report.

use murk_core::interp::Interp;
use murk_core::parser::parse_module;
use murk_core::printer::print_module;
use murk_core::verifier::{reachable_blocks, verify_module};
use murk_core::Module;
use murk_transforms::pipeline::{self, preset_passes, ObfuscationConfig, PipelineSummary};
use murk_utils::config::ObfConfig;
use murk_utils::reporter::{
    Reporter, BOGUS_BLOCKS_INSERTED, FAKE_LOOPS_ADDED, FUNCTIONS_FLATTENED,
    NUM_STRINGS_ENCRYPTED, TOTAL_STRING_BYTES,
};

async fn obfuscate(module: &mut Module, preset: &str, seed: u32) -> (PipelineSummary, Reporter) {
    let cfg = ObfConfig {
        seed,
        // Admit every function so the block-insertion scenarios are not at
        // the mercy of the admission draw.
        bogus_ratio: 100,
        ..ObfConfig::default()
    };
    let transforms = preset_passes(preset, &cfg).unwrap();
    let config = ObfuscationConfig { cfg, transforms };
    let mut reporter = Reporter::new(None);
    let summary = pipeline::run(module, &config, &mut reporter).await.unwrap();
    (summary, reporter)
}

const S1_ADD_AND_STRING: &str = r#"
module s1
global @.str = private constant [3 x i8] c"hi\00"

func @add(i32 %a, i32 %b) -> i32 {
entry:
  %sum = add i32 %a, %b
  ret i32 %sum
}

func @greet() -> ptr {
entry:
  %p = gep ptr @.str
  ret ptr %p
}
"#;

#[tokio::test]
async fn s1_light_encrypts_string_and_preserves_add() {
    let mut m = parse_module(S1_ADD_AND_STRING).unwrap();
    let (_, reporter) = obfuscate(&mut m, "light", 1).await;

    assert_eq!(reporter.get(NUM_STRINGS_ENCRYPTED), 1);
    assert_eq!(reporter.get(TOTAL_STRING_BYTES), 2);

    let mut interp = Interp::new(&m);
    assert_eq!(interp.call_i32("add", &[2, 3]).unwrap(), 5);
    let s = interp.call("greet", &[]).unwrap().unwrap();
    assert_eq!(interp.read_cstr(s).unwrap(), b"hi".to_vec());

    // The plaintext never appears in the output image.
    assert!(!print_module(&m).contains("c\"hi"));
}

const S2_SIGN_SPLIT: &str = r#"
module s2
func @f(i32 %x) -> i32 {
entry:
  %pos = icmp sgt i32 %x, 0
  br i1 %pos, %keep, %flip
keep:
  ret i32 %x
flip:
  %minus = sub i32 0, %x
  ret i32 %minus
}
"#;

#[tokio::test]
async fn s2_balanced_preserves_abs_behavior() {
    let mut m = parse_module(S2_SIGN_SPLIT).unwrap();
    let original = parse_module(S2_SIGN_SPLIT).unwrap();
    let (_, reporter) = obfuscate(&mut m, "balanced", 42).await;

    assert!(reporter.get(BOGUS_BLOCKS_INSERTED) >= 1);
    assert!(reporter.get(FAKE_LOOPS_ADDED) >= 1);

    let mut before = Interp::new(&original);
    let mut after = Interp::new(&m);
    for x in [-3, 0, 7] {
        assert_eq!(
            after.call_i32("f", &[x]).unwrap(),
            before.call_i32("f", &[x]).unwrap()
        );
    }
}

/// Nested conditionals plus a loop with an early exit, the classic
/// flattening stress shape.
const S3_COMPLEX_FLOW: &str = r#"
module s3
func @complex_flow(i32 %a, i32 %b) -> i32 {
entry:
  %result = alloca i32
  %i = alloca i32
  store i32 0, ptr %result
  %c0 = icmp sgt i32 %a, 0
  br i1 %c0, %if.then, %if.else
if.then:
  %c1 = icmp sgt i32 %b, 0
  br i1 %c1, %then.pos, %then.neg
then.pos:
  %t4 = add i32 %a, %b
  store i32 %t4, ptr %result
  br %loop.init
then.neg:
  %t7 = sub i32 %a, %b
  store i32 %t7, ptr %result
  br %loop.init
if.else:
  %c2 = icmp sgt i32 %b, 0
  br i1 %c2, %else.pos, %else.neg
else.pos:
  %t10 = sub i32 0, %a
  %t12 = add i32 %t10, %b
  store i32 %t12, ptr %result
  br %loop.init
else.neg:
  %t14 = sub i32 0, %a
  %t16 = sub i32 %t14, %b
  store i32 %t16, ptr %result
  br %loop.init
loop.init:
  store i32 0, ptr %i
  br %loop.cond
loop.cond:
  %t17 = load i32, ptr %i
  %c3 = icmp slt i32 %t17, %a
  br i1 %c3, %loop.bound, %loop.end
loop.bound:
  %t19 = load i32, ptr %i
  %c4 = icmp slt i32 %t19, 10
  br i1 %c4, %loop.body, %loop.end
loop.body:
  %t20 = load i32, ptr %result
  %c5 = icmp sgt i32 %t20, 100
  br i1 %c5, %loop.end, %loop.cont
loop.cont:
  %t21 = load i32, ptr %result
  %t23 = add i32 %t21, %b
  store i32 %t23, ptr %result
  br %loop.inc
loop.inc:
  %t24 = load i32, ptr %i
  %t25 = add i32 %t24, 1
  store i32 %t25, ptr %i
  br %loop.cond
loop.end:
  %t26 = load i32, ptr %result
  ret i32 %t26
}
"#;

#[tokio::test]
async fn s3_aggressive_preserves_complex_flow() {
    let mut m = parse_module(S3_COMPLEX_FLOW).unwrap();
    let original = parse_module(S3_COMPLEX_FLOW).unwrap();
    let (_, reporter) = obfuscate(&mut m, "aggressive", 1234).await;

    assert!(reporter.get(FUNCTIONS_FLATTENED) >= 1);
    verify_module(&m).unwrap();

    let mut before = Interp::new(&original);
    let mut after = Interp::new(&m);
    for (a, b) in [(5, 3), (-5, -3), (15, 10), (0, 0), (2, -9)] {
        assert_eq!(
            after.call_i32("complex_flow", &[a, b]).unwrap(),
            before.call_i32("complex_flow", &[a, b]).unwrap(),
            "complex_flow({a},{b}) diverged"
        );
    }
    // Positive path, negative path and the early exit of the bounded loop.
    assert_eq!(after.call_i32("complex_flow", &[5, 3]).unwrap(), 23);
    assert_eq!(after.call_i32("complex_flow", &[-5, -3]).unwrap(), 8);
    assert_eq!(after.call_i32("complex_flow", &[15, 10]).unwrap(), 105);
}

#[tokio::test]
async fn s3_flattened_function_has_no_orphan_blocks() {
    let mut m = parse_module(S3_COMPLEX_FLOW).unwrap();
    obfuscate(&mut m, "aggressive", 1234).await;
    let f = m.func("complex_flow").unwrap();
    let reached = reachable_blocks(f);
    assert_eq!(
        reached.len(),
        f.blocks.len(),
        "every block must be reachable through the dispatcher"
    );
}

const S6_EMPTY_MAIN: &str = r#"
module s6
func @main() -> i32 {
entry:
  ret i32 0
}
"#;

#[tokio::test]
async fn s6_empty_main_survives_light() {
    let mut m = parse_module(S6_EMPTY_MAIN).unwrap();
    let (_, reporter) = obfuscate(&mut m, "light", 5).await;
    assert_eq!(reporter.get(NUM_STRINGS_ENCRYPTED), 0);
    verify_module(&m).unwrap();
    let mut interp = Interp::new(&m);
    assert_eq!(interp.call_i32("main", &[]).unwrap(), 0);
}

#[tokio::test]
async fn full_pipeline_composes_with_strings_and_branches() {
    let text = r#"
module compose
global @.msg = private constant [5 x i8] c"obfs\00"

func @classify(i32 %x) -> i32 {
entry:
  %big = icmp sgt i32 %x, 9
  br i1 %big, %high, %low
high:
  %h = mul i32 %x, 3
  ret i32 %h
low:
  %l = add i32 %x, 1
  ret i32 %l
}

func @banner() -> ptr {
entry:
  %p = gep ptr @.msg
  ret ptr %p
}
"#;
    let mut m = parse_module(text).unwrap();
    let original = parse_module(text).unwrap();
    let (summary, reporter) = obfuscate(&mut m, "aggressive", 7).await;

    assert_eq!(
        summary.passes_applied,
        vec!["string-obf", "bogus-insert", "fake-loop", "cff"]
    );
    assert_eq!(reporter.get(NUM_STRINGS_ENCRYPTED), 1);
    assert!(summary.blocks_delta > 0);
    assert!(summary.instructions_delta > 0);

    let mut before = Interp::new(&original);
    let mut after = Interp::new(&m);
    for x in [-5, 0, 9, 10, 100] {
        assert_eq!(
            after.call_i32("classify", &[x]).unwrap(),
            before.call_i32("classify", &[x]).unwrap()
        );
    }
    let s = after.call("banner", &[]).unwrap().unwrap();
    assert_eq!(after.read_cstr(s).unwrap(), b"obfs".to_vec());
}

#[tokio::test]
async fn counters_accumulate_across_cycles() {
    let mut m = parse_module(S2_SIGN_SPLIT).unwrap();
    let cfg = ObfConfig {
        seed: 3,
        bogus_ratio: 100,
        cycles: 2,
        ..ObfConfig::default()
    };
    let transforms = preset_passes("balanced", &cfg).unwrap();
    let config = ObfuscationConfig { cfg, transforms };
    let mut reporter = Reporter::new(None);
    pipeline::run(&mut m, &config, &mut reporter).await.unwrap();

    // Cycle one inserts a diamond and wraps the entry in a fake loop, which
    // leaves the entry holding only a terminator; cycle two therefore skips
    // bogus insertion as too small but prepends a second loop. Counters only
    // ever grow.
    assert_eq!(reporter.get(BOGUS_BLOCKS_INSERTED), 1);
    assert_eq!(reporter.get(FAKE_LOOPS_ADDED), 2);
    verify_module(&m).unwrap();

    let mut interp = Interp::new(&m);
    assert_eq!(interp.call_i32("f", &[-8]).unwrap(), 8);
}

#[tokio::test]
async fn report_file_has_the_documented_keys() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("counters.json");
    let mut m = parse_module(S1_ADD_AND_STRING).unwrap();
    let cfg = ObfConfig {
        seed: 11,
        bogus_ratio: 100,
        report_path: Some(path.clone()),
        ..ObfConfig::default()
    };
    let transforms = preset_passes("aggressive", &cfg).unwrap();
    let mut reporter = Reporter::new(cfg.report_path.clone());
    let config = ObfuscationConfig { cfg, transforms };
    pipeline::run(&mut m, &config, &mut reporter).await.unwrap();

    let doc: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(doc["num_strings_encrypted"], 1);
    assert_eq!(doc["total_string_bytes"], 2);
    assert!(doc["bogus_blocks_inserted"].as_u64().unwrap() >= 1);
    assert!(doc["fake_loops_added"].as_u64().unwrap() >= 1);
    assert!(doc["functions_flattened"].as_u64().is_some());
}
