//! Runtime call table (spec.md §6).
//!
//! The external C runtime library is a collaborator, not something this
//! crate builds — codegen only needs to know each call's QBE-style
//! parameter/return shape so it can marshal arguments and pick up the
//! result type correctly. Mirrors the teacher's `codegen/runtime.rs`
//! data-driven declaration table, except QBE doesn't need forward
//! `declare`s the way LLVM IR does (an external symbol is simply called
//! and resolved by the backend/linker), so this table exists purely for
//! codegen's own lookups rather than emitting anything itself.

/// One runtime entry point's calling shape: QBE type letters for its
/// parameters and return value (`None` return means `void`).
pub struct RuntimeFn {
    pub name: &'static str,
    pub params: &'static [&'static str],
    pub ret: Option<&'static str>,
}

macro_rules! rt {
    ($name:literal, [$($p:literal),*], $ret:expr) => {
        RuntimeFn { name: $name, params: &[$($p),*], ret: $ret }
    };
}

pub const STR_NEW: RuntimeFn = rt!("str_new", ["l"], Some("l"));
pub const STR_LENGTH: RuntimeFn = rt!("str_length", ["l"], Some("l"));
pub const STR_CONCAT: RuntimeFn = rt!("str_concat", ["l", "l"], Some("l"));
pub const STR_SUBSTR: RuntimeFn = rt!("str_substr", ["l", "l", "l"], Some("l"));
pub const STR_LEFT: RuntimeFn = rt!("str_left", ["l", "l"], Some("l"));
pub const STR_RIGHT: RuntimeFn = rt!("str_right", ["l", "l"], Some("l"));
pub const STR_COMPARE: RuntimeFn = rt!("str_compare", ["l", "l"], Some("w"));
pub const STR_UPPER: RuntimeFn = rt!("str_upper", ["l"], Some("l"));
pub const STR_LOWER: RuntimeFn = rt!("str_lower", ["l"], Some("l"));
pub const STR_TRIM: RuntimeFn = rt!("str_trim", ["l"], Some("l"));
pub const STR_INDEXOF: RuntimeFn = rt!("str_indexof", ["l", "l"], Some("l"));
pub const STR_REPLACE: RuntimeFn = rt!("str_replace", ["l", "l", "l"], Some("l"));
pub const STR_RETAIN: RuntimeFn = rt!("str_retain", ["l"], None);
pub const STR_RELEASE: RuntimeFn = rt!("str_release", ["l"], None);

pub const INT_TO_STR: RuntimeFn = rt!("int_to_str", ["l"], Some("l"));
pub const DOUBLE_TO_STR: RuntimeFn = rt!("double_to_str", ["d"], Some("l"));
pub const STR_TO_INT: RuntimeFn = rt!("str_to_int", ["l"], Some("l"));
pub const STR_TO_DOUBLE: RuntimeFn = rt!("str_to_double", ["l"], Some("d"));

pub const ARRAY_NEW: RuntimeFn = rt!("array_new", ["w", "l"], Some("l"));
pub const ARRAY_REDIM: RuntimeFn = rt!("array_redim", ["l", "l"], Some("l"));
pub const ARRAY_REDIM_PRESERVE: RuntimeFn = rt!("array_redim_preserve", ["l", "l"], Some("l"));
pub const ARRAY_FREE: RuntimeFn = rt!("array_free", ["l"], None);
pub const ARRAY_GET: RuntimeFn = rt!("array_get", ["l", "l"], Some("l"));
pub const ARRAY_SET: RuntimeFn = rt!("array_set", ["l", "l", "l"], None);
pub const ARRAY_LBOUND: RuntimeFn = rt!("array_lbound", ["l", "w"], Some("l"));
pub const ARRAY_UBOUND: RuntimeFn = rt!("array_ubound", ["l", "w"], Some("l"));

pub const CLASS_NEW: RuntimeFn = rt!("class_new", ["w", "l"], Some("l"));
pub const CLASS_RETAIN: RuntimeFn = rt!("class_retain", ["l"], None);
pub const CLASS_RELEASE: RuntimeFn = rt!("class_release", ["l"], None);
pub const CLASS_IS_INSTANCE: RuntimeFn = rt!("class_is_instance", ["l", "w"], Some("w"));

pub const LIST_NEW: RuntimeFn = rt!("list_new", [], Some("l"));
pub const LIST_APPEND: RuntimeFn = rt!("list_append", ["l", "l"], None);
pub const LIST_PREPEND: RuntimeFn = rt!("list_prepend", ["l", "l"], None);
pub const LIST_HEAD: RuntimeFn = rt!("list_head", ["l"], Some("l"));
pub const LIST_TAIL: RuntimeFn = rt!("list_tail", ["l"], Some("l"));
pub const LIST_LENGTH: RuntimeFn = rt!("list_length", ["l"], Some("l"));
pub const LIST_GET: RuntimeFn = rt!("list_get", ["l", "l"], Some("l"));
pub const LIST_SET: RuntimeFn = rt!("list_set", ["l", "l", "l"], None);
pub const LIST_ITER_NEW: RuntimeFn = rt!("list_iter_new", ["l"], Some("l"));
pub const LIST_ITER_NEXT: RuntimeFn = rt!("list_iter_next", ["l", "l"], Some("w"));
pub const LIST_ITER_TAG: RuntimeFn = rt!("list_iter_tag", ["l"], Some("w"));

pub const HASHMAP_NEW: RuntimeFn = rt!("hashmap_new", [], Some("l"));
pub const HASHMAP_GET: RuntimeFn = rt!("hashmap_get", ["l", "l"], Some("l"));
pub const HASHMAP_SET: RuntimeFn = rt!("hashmap_set", ["l", "l", "l"], None);
pub const HASHMAP_HASKEY: RuntimeFn = rt!("hashmap_haskey", ["l", "l"], Some("w"));

pub const TRY_ENTER: RuntimeFn = rt!("try_enter", ["l"], None);
pub const TRY_LEAVE: RuntimeFn = rt!("try_leave", [], None);
pub const RUNTIME_THROW: RuntimeFn = rt!("runtime_throw", ["l"], None);
pub const RUNTIME_GET_ERR: RuntimeFn = rt!("runtime_get_err", [], Some("l"));
pub const RUNTIME_GET_ERL: RuntimeFn = rt!("runtime_get_erl", [], Some("l"));

pub const TIMER_AFTER: RuntimeFn = rt!("timer_after", ["l", "w"], None);
pub const TIMER_EVERY: RuntimeFn = rt!("timer_every", ["l", "w"], None);
pub const TIMER_AFTER_FRAMES: RuntimeFn = rt!("timer_after_frames", ["l", "w"], None);
pub const TIMER_EVERY_FRAME: RuntimeFn = rt!("timer_every_frame", ["w"], None);
pub const TIMER_STOP: RuntimeFn = rt!("timer_stop", ["w"], None);
pub const TIMER_INTERVAL: RuntimeFn = rt!("timer_interval", ["l"], None);

pub const DATA_RESTORE_LINE: RuntimeFn = rt!("data_restore_line", ["l"], None);
pub const DATA_RESTORE_LABEL: RuntimeFn = rt!("data_restore_label", ["l"], None);
pub const DATA_READ_INT: RuntimeFn = rt!("data_read_int", [], Some("l"));
pub const DATA_READ_DOUBLE: RuntimeFn = rt!("data_read_double", [], Some("d"));
pub const DATA_READ_STRING: RuntimeFn = rt!("data_read_string", [], Some("l"));

pub const RND: RuntimeFn = rt!("rnd", [], Some("d"));
pub const GETTICK: RuntimeFn = rt!("gettick", [], Some("l"));
pub const SLEEP_MS: RuntimeFn = rt!("sleep_ms", ["l"], None);
pub const INPUT_LINE: RuntimeFn = rt!("input_line", [], Some("l"));
pub const INPUT_SET_CURSOR: RuntimeFn = rt!("input_set_cursor", ["l", "l"], None);
pub const PRINT_INT: RuntimeFn = rt!("print_int", ["l"], None);
pub const PRINT_DOUBLE: RuntimeFn = rt!("print_double", ["d"], None);
pub const PRINT_STRING: RuntimeFn = rt!("print_string", ["l"], None);
pub const PRINT_NEWLINE: RuntimeFn = rt!("print_newline", [], None);
pub const PRINT_TAB: RuntimeFn = rt!("print_tab", [], None);
pub const RUNTIME_YIELD: RuntimeFn = rt!("runtime_yield", [], None);
pub const RUNTIME_CANCELLED: RuntimeFn = rt!("runtime_cancelled", [], Some("w"));

/// Name of the mangled instance method entry point: `CLASS__METHOD`.
pub fn mangle_method(class_name: &str, method_name: &str) -> String {
    format!("{}__{}", class_name.to_ascii_uppercase(), method_name.to_ascii_uppercase())
}
