/// Python Preamble - Restricted Execution Surface
///
/// Wraps candidate source in a trusted Python program that:
/// 1. Re-applies resource ceilings through the `resource` module, skipping
///    any primitive the platform lacks
/// 2. Builds an explicit allow-list of built-ins plus a guarded `__import__`
/// 3. Executes the candidate (embedded base64) in a fresh namespace whose
///    `__builtins__` is that allow-list
/// 4. Optionally evaluates a probe expression in the same namespace and
///    prints its `repr` behind a marker, using the trusted `print`/`repr`
///
/// The embedding means the candidate never shares a namespace with the
/// trusted code, so rebinding `print` or `repr` cannot forge a probe value.
use crate::config::SandboxProfile;
use crate::runner::Probe;
use base64::{engine::general_purpose, Engine as _};

/// Built-ins the candidate may call: arithmetic, collection, string,
/// stdin/stdout, class definition, and the exception types it may raise
/// or catch. No file, network, process, reflection, or evaluation primitives.
pub const ALLOWED_BUILTINS: &[&str] = &[
    "print", "input", "len", "range", "int", "float", "str", "bool", "list", "dict", "set",
    "frozenset", "tuple", "abs", "max", "min", "sum", "sorted", "reversed", "enumerate", "zip",
    "map", "filter", "any", "all", "isinstance", "issubclass", "type", "round", "pow", "divmod",
    "chr", "ord", "hex", "bin", "oct", "format", "repr", "hash", "id", "slice", "iter", "next",
    "object", "super", "property", "staticmethod", "classmethod", "__build_class__",
    "True", "False", "None", "Exception", "BaseException", "ArithmeticError", "AssertionError",
    "AttributeError", "IndexError", "KeyError", "LookupError", "NameError",
    "NotImplementedError", "OverflowError", "RecursionError", "RuntimeError", "StopIteration",
    "TypeError", "ValueError", "ZeroDivisionError", "EOFError",
];

const TEMPLATE: &str = r#"import base64 as _codegrade_b64
import builtins as _codegrade_builtins

try:
    import resource as _codegrade_resource
    for _codegrade_name, _codegrade_value in (
        ("RLIMIT_AS", ({memory}, {memory})),
        ("RLIMIT_CPU", ({cpu_soft}, {cpu_hard})),
        ("RLIMIT_FSIZE", (0, 0)),
        ("RLIMIT_NPROC", (0, 0)),
    ):
        try:
            _codegrade_resource.setrlimit(
                getattr(_codegrade_resource, _codegrade_name), _codegrade_value
            )
        except (AttributeError, ValueError, OSError):
            pass
except ImportError:
    pass

_codegrade_allowed_names = ({builtins})
_codegrade_allowed_modules = frozenset(({modules}))
_codegrade_real_import = _codegrade_builtins.__import__


def _codegrade_import(name, globals=None, locals=None, fromlist=(), level=0):
    if level != 0 or name.split(".")[0] not in _codegrade_allowed_modules:
        raise ImportError("import of '%s' is not allowed" % name)
    return _codegrade_real_import(name, globals, locals, fromlist, level)


_codegrade_safe = {
    _n: getattr(_codegrade_builtins, _n)
    for _n in _codegrade_allowed_names
    if hasattr(_codegrade_builtins, _n)
}
_codegrade_safe["__import__"] = _codegrade_import
_codegrade_namespace = {"__builtins__": _codegrade_safe, "__name__": "__main__"}

_codegrade_source = _codegrade_b64.b64decode("{source}").decode("utf-8")
exec(compile(_codegrade_source, "<submission>", "exec"), _codegrade_namespace)
"#;

const PROBE_TEMPLATE: &str = r#"
_codegrade_probe = _codegrade_b64.b64decode("{expression}").decode("utf-8")
_codegrade_value = eval(compile(_codegrade_probe, "<probe>", "eval"), _codegrade_namespace)
print("{marker}" + repr(_codegrade_value))
"#;

fn python_tuple(items: impl Iterator<Item = String>) -> String {
    // Trailing comma keeps single-element tuples valid
    items
        .map(|item| format!("\"{}\", ", item))
        .collect::<String>()
        .trim_end()
        .to_string()
}

/// Compose the full program written to the staged file
pub fn compose(
    source: &str,
    timeout_secs: u64,
    profile: &SandboxProfile,
    probe: Option<&Probe>,
) -> String {
    let memory = profile.memory_limit_bytes();
    let (cpu_soft, cpu_hard) = cpu_limits(timeout_secs);

    let mut program = TEMPLATE
        .replace("{memory}", &memory.to_string())
        .replace("{cpu_soft}", &cpu_soft.to_string())
        .replace("{cpu_hard}", &cpu_hard.to_string())
        .replace(
            "{builtins}",
            &python_tuple(ALLOWED_BUILTINS.iter().map(|b| b.to_string())),
        )
        .replace(
            "{modules}",
            &python_tuple(profile.allowed_modules.iter().cloned()),
        )
        .replace("{source}", &general_purpose::STANDARD.encode(source));

    if let Some(probe) = probe {
        program.push_str(
            &PROBE_TEMPLATE
                .replace("{expression}", &general_purpose::STANDARD.encode(&probe.expression))
                .replace("{marker}", &probe.marker),
        );
    }

    program
}

/// CPU-time ceiling sits slightly above the wall-clock timeout so the
/// supervisor's kill normally fires first
pub fn cpu_limits(timeout_secs: u64) -> (u64, u64) {
    let soft = timeout_secs.max(1) + 1;
    (soft, soft + 1)
}
