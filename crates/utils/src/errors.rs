use thiserror::Error;

/// Error type for parsing textual IR.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("parse error at line {line}: {msg} ⇒ `{raw}`")]
    Syntax {
        line: usize,
        msg: String,
        raw: String,
    },
    /// A value, block or global name is referenced before (or without) a definition.
    #[error("parse error at line {line}: unknown name `{name}`")]
    UnknownName { line: usize, name: String },
    /// The same value or block name is defined twice in one function.
    #[error("parse error at line {line}: duplicate definition of `{name}`")]
    Duplicate { line: usize, name: String },
}

/// Error type for IR verification; a violation means a pass produced malformed IR.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("function `{func}`: block `{block}` references detached block `{target}`")]
    DetachedBlock {
        func: String,
        block: String,
        target: String,
    },
    #[error("function `{func}`: phi in `{block}` does not match predecessors ({detail})")]
    PhiMismatch {
        func: String,
        block: String,
        detail: String,
    },
    #[error("function `{func}`: use of `{value}` in `{block}` is not dominated by its definition")]
    UseNotDominated {
        func: String,
        block: String,
        value: String,
    },
    #[error("function `{func}`: use of deleted value `{value}` in `{block}`")]
    DeletedValue {
        func: String,
        block: String,
        value: String,
    },
    #[error("function `{func}`: use of deleted global in `{block}`")]
    DeletedGlobal { func: String, block: String },
    #[error("function `{func}`: call to unknown callee `{callee}`")]
    UnknownCallee { func: String, callee: String },
    #[error("function `{func}`: call to `{callee}` does not match its signature")]
    SignatureMismatch { func: String, callee: String },
    #[error("function `{func}`: entry block is missing")]
    NoEntryBlock { func: String },
    #[error("function `{func}`: phi node in entry block")]
    PhiInEntry { func: String },
}

/// Error type for transform passes. Ineligible functions are skipped silently and
/// are not errors; these variants cover genuine failures.
#[derive(Debug, Error)]
pub enum TransformError {
    /// The module already declares a runtime helper with an incompatible signature.
    #[error("runtime helper `{0}` exists with a conflicting signature")]
    HelperSignatureClash(String),
    #[error("transform failed: {0}")]
    Generic(String),
}

/// Error type for the reference interpreter.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
    #[error("cannot evaluate declaration `{0}`")]
    Declaration(String),
    #[error("wrong argument count for `{func}`: expected {expected}, got {got}")]
    WrongArgCount {
        func: String,
        expected: usize,
        got: usize,
    },
    #[error("step budget exhausted (possible non-termination)")]
    StepLimit,
    #[error("null or dangling pointer dereference")]
    BadPointer,
    #[error("memory access out of bounds (object {obj}, offset {off})")]
    OutOfBounds { obj: usize, off: usize },
    #[error("use of freed buffer")]
    UseAfterFree,
    #[error("executed `unreachable`")]
    Unreachable,
    #[error("type error during evaluation: {0}")]
    Type(String),
}

/// Errors surfaced by the obfuscation pipeline and the CLI wrapping it.
#[derive(Debug, Error)]
pub enum ObfuscateError {
    #[error("file error: {0}")]
    File(#[from] std::io::Error),
    #[error("input IR unreadable: {0}")]
    Parse(#[from] ParseError),
    #[error("transform error: {0}")]
    Transform(#[from] TransformError),
    #[error("invalid pass: {0}")]
    InvalidPass(String),
    #[error("invalid preset: {0}")]
    InvalidPreset(String),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    /// A pass broke an IR invariant; the module must not be written out.
    #[error("pass `{pass}` produced invalid IR: {source}")]
    InvariantViolation {
        pass: String,
        #[source]
        source: VerifyError,
    },
}
