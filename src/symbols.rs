//! Symbol table shared by the semantic analyzer, CFG builder, and codegen.
//!
//! Built incrementally during C9 pass 1 (declarations) and read-only from
//! pass 2 onward. Keeping it as one flat struct rather than splitting scope
//! tracking across phases mirrors the teacher's `codegen/state.rs`, which
//! holds global + per-word state in a single `CodeGenState` threaded through
//! every codegen visitor.

use std::collections::HashMap;

use crate::ast::{ClassDecl, RoutineDecl, TypeDecl};
use crate::const_eval::ConstValue;
use crate::data_prep::DataSegment;
use crate::options::CompileOptions;
use crate::types::{SimdInfo, TypeDescriptor};

#[derive(Debug, Clone)]
pub struct VariableInfo {
    pub name: String,
    pub ty: TypeDescriptor,
    pub is_global: bool,
    pub is_array: bool,
    pub dimensions: Vec<Option<u32>>,
}

#[derive(Debug, Clone)]
pub struct ConstantInfo {
    pub name: String,
    pub ty: TypeDescriptor,
    pub value: ConstValue,
}

#[derive(Debug, Clone)]
pub struct UdtInfo {
    pub name: String,
    pub type_id: u32,
    pub fields: Vec<(String, TypeDescriptor)>,
    /// `Some` when every field is numeric and the same width, enabling
    /// vectorized load/store in codegen (spec.md §3 invariant 4).
    pub simd: Option<SimdInfo>,
    pub size_bytes: u32,
}

#[derive(Debug, Clone)]
pub struct FieldLayout {
    pub name: String,
    pub ty: TypeDescriptor,
    pub offset: u32,
}

#[derive(Debug, Clone)]
pub struct MethodSlot {
    pub name: String,
    pub vtable_index: u32,
    pub declaring_class: String,
    pub param_types: Vec<TypeDescriptor>,
    pub return_type: Option<TypeDescriptor>,
}

#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub name: String,
    pub class_id: u32,
    pub parent: Option<String>,
    /// Own fields plus inherited fields, in layout order: 8-byte vtable
    /// pointer + 4-byte class id header first, then inherited fields at
    /// their parent's offsets, then own fields (spec.md §3 invariant 5).
    pub layout: Vec<FieldLayout>,
    pub vtable: Vec<MethodSlot>,
    pub instance_size: u32,
    pub has_constructor: bool,
    pub has_destructor: bool,
}

impl ClassInfo {
    pub fn find_field(&self, name: &str) -> Option<&FieldLayout> {
        self.layout.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    pub fn find_method(&self, name: &str) -> Option<&MethodSlot> {
        self.vtable.iter().find(|m| m.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone)]
pub struct RoutineSignature {
    pub name: String,
    pub param_types: Vec<TypeDescriptor>,
    pub param_by_ref: Vec<bool>,
    pub return_type: Option<TypeDescriptor>,
}

/// Scope a variable/array declaration lives in (spec.md §3 data model).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    Function(String),
}

#[derive(Debug, Clone)]
pub struct ArrayInfo {
    pub name: String,
    pub element_ty: TypeDescriptor,
    /// One entry per dimension; `None` means the extent is resolved at
    /// runtime (unknown-size `DIM`, always sized via `REDIM`).
    pub dimensions: Vec<Option<u32>>,
    pub scope: Scope,
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    pub options: CompileOptions,
    /// Keyed by `(mangled name, scope)` so a local shadows a global of the
    /// same mangled name without colliding in one flat map.
    pub variables: HashMap<(String, Scope), VariableInfo>,
    pub arrays: HashMap<(String, Scope), ArrayInfo>,
    pub constants: HashMap<String, ConstantInfo>,
    pub udts: HashMap<String, UdtInfo>,
    pub classes: HashMap<String, ClassInfo>,
    pub routines: HashMap<String, RoutineSignature>,
    pub lines: HashMap<u32, usize>,
    pub labels: HashMap<String, usize>,
    pub data: DataSegment,
    /// Handler names referenced by `AFTER`/`EVERY`/`AFTERFRAMES`/`EVERYFRAME`.
    pub timer_handlers: Vec<String>,
    next_udt_id: u32,
    next_class_id: u32,
}

impl SymbolTable {
    pub fn new(options: CompileOptions) -> Self {
        SymbolTable {
            options,
            ..Default::default()
        }
    }

    pub fn declare_variable(&mut self, scope: Scope, info: VariableInfo) {
        self.variables.insert((info.name.clone(), scope), info);
    }

    pub fn declare_constant(&mut self, info: ConstantInfo) {
        self.constants.insert(info.name.to_ascii_uppercase(), info);
    }

    pub fn lookup_constant(&self, name: &str) -> Option<&ConstantInfo> {
        self.constants.get(&name.to_ascii_uppercase())
    }

    /// Resolve a variable reference against function scope then global
    /// scope, per spec.md §3 invariant 1.
    pub fn lookup_variable(&self, name: &str, function: Option<&str>) -> Option<&VariableInfo> {
        if let Some(f) = function
            && let Some(v) = self.variables.get(&(name.to_string(), Scope::Function(f.to_string())))
        {
            return Some(v);
        }
        self.variables.get(&(name.to_string(), Scope::Global))
    }

    pub fn declare_array(&mut self, scope: Scope, info: ArrayInfo) {
        self.arrays.insert((info.name.clone(), scope), info);
    }

    pub fn lookup_array(&self, name: &str, function: Option<&str>) -> Option<&ArrayInfo> {
        if let Some(f) = function
            && let Some(a) = self.arrays.get(&(name.to_string(), Scope::Function(f.to_string())))
        {
            return Some(a);
        }
        self.arrays.get(&(name.to_string(), Scope::Global))
    }

    pub fn next_udt_id(&mut self) -> u32 {
        let id = self.next_udt_id;
        self.next_udt_id += 1;
        id
    }

    pub fn next_class_id(&mut self) -> u32 {
        let id = self.next_class_id;
        self.next_class_id += 1;
        id
    }

    pub fn register_line(&mut self, number: u32, block_index: usize) {
        self.lines.insert(number, block_index);
    }

    pub fn register_label(&mut self, label: String, block_index: usize) {
        self.labels.insert(label, block_index);
    }
}

/// Classify a UDT's fields for backend vectorization, per spec.md §3
/// invariant 4: homogeneous numeric lanes of a supported width/count.
pub fn classify_simd(fields: &[(String, TypeDescriptor)]) -> Option<SimdInfo> {
    if fields.is_empty() {
        return None;
    }
    let first = &fields[0].1;
    if !first.is_numeric() {
        return None;
    }
    if !fields.iter().all(|(_, t)| t == first) {
        return None;
    }
    let width = first.bit_width();
    let is_float = first.is_float();
    match (fields.len(), width, is_float) {
        (2, 64, true) => Some(SimdInfo::V2D),
        (4, 32, true) => Some(SimdInfo::V4S),
        (2, 32, true) => Some(SimdInfo::V2S),
        (3, 32, true) => Some(SimdInfo::V4SPad1),
        (8, 16, false) => Some(SimdInfo::V8H),
        (4, 16, false) => Some(SimdInfo::V4H),
        (16, 8, false) => Some(SimdInfo::V16B),
        (8, 8, false) => Some(SimdInfo::V8B),
        _ => None,
    }
}

/// Declaration-order layout for a flat UDT: 8-byte header implied by the
/// caller for classes only — plain `TYPE` records have no vtable/class id.
pub fn layout_udt_fields(fields: &[(String, TypeDescriptor)]) -> (Vec<FieldLayout>, u32) {
    let mut offset = 0u32;
    let mut layout = Vec::with_capacity(fields.len());
    for (name, ty) in fields {
        let size = (ty.bit_width() / 8).max(1);
        layout.push(FieldLayout {
            name: name.clone(),
            ty: ty.clone(),
            offset,
        });
        offset += size;
    }
    (layout, offset)
}

pub const CLASS_HEADER_SIZE: u32 = 12; // 8-byte vtable ptr + 4-byte class id

/// Build a class's full field layout and vtable, given its already-built
/// parent `ClassInfo` (or `None` for a root class). Preserves parent field
/// offsets and vtable slot indices (spec.md §3 invariant 5 / Open Question
/// decision 3 in DESIGN.md).
pub fn layout_class(
    decl: &ClassDecl,
    parent: Option<&ClassInfo>,
    class_id: u32,
) -> ClassInfo {
    let mut layout = Vec::new();
    let mut offset = CLASS_HEADER_SIZE;
    let mut vtable: Vec<MethodSlot> = Vec::new();

    if let Some(p) = parent {
        layout.extend(p.layout.iter().cloned());
        offset = p.instance_size;
        vtable = p.vtable.clone();
    }

    for field in &decl.fields {
        let size = (field.ty.bit_width() / 8).max(1);
        layout.push(FieldLayout {
            name: field.name.clone(),
            ty: field.ty.clone(),
            offset,
        });
        offset += size;
    }

    for method in &decl.methods {
        let param_types = method.params.iter().map(|p| p.ty.clone()).collect();
        if method.is_override {
            if let Some(existing) = vtable
                .iter_mut()
                .find(|m| m.name.eq_ignore_ascii_case(&method.name))
            {
                existing.declaring_class = decl.name.clone();
                existing.param_types = param_types;
                existing.return_type = method.return_type.clone();
                continue;
            }
        }
        let idx = vtable.len() as u32;
        vtable.push(MethodSlot {
            name: method.name.clone(),
            vtable_index: idx,
            declaring_class: decl.name.clone(),
            param_types,
            return_type: method.return_type.clone(),
        });
    }

    ClassInfo {
        name: decl.name.clone(),
        class_id,
        parent: decl.parent.clone(),
        layout,
        vtable,
        instance_size: offset,
        has_constructor: decl.constructor.is_some(),
        has_destructor: decl.destructor.is_some(),
    }
}

pub fn register_type_decl(table: &mut SymbolTable, decl: &TypeDecl) {
    let fields: Vec<(String, TypeDescriptor)> = decl
        .fields
        .iter()
        .map(|f| (f.name.clone(), f.ty.clone()))
        .collect();
    let simd = classify_simd(&fields);
    let (_layout, size) = layout_udt_fields(&fields);
    let id = table.next_udt_id();
    table.udts.insert(
        decl.name.clone(),
        UdtInfo {
            name: decl.name.clone(),
            type_id: id,
            fields,
            simd,
            size_bytes: size,
        },
    );
}

pub fn register_routine(table: &mut SymbolTable, decl: &RoutineDecl) {
    table.routines.insert(
        decl.name.to_ascii_uppercase(),
        RoutineSignature {
            name: decl.name.clone(),
            param_types: decl.params.iter().map(|p| p.ty.clone()).collect(),
            param_by_ref: decl.params.iter().map(|p| p.by_ref).collect(),
            return_type: decl.return_type.clone(),
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BaseType;

    #[test]
    fn classifies_v4s_float_udt() {
        let fields = vec![
            ("X".to_string(), TypeDescriptor::simple(BaseType::Single)),
            ("Y".to_string(), TypeDescriptor::simple(BaseType::Single)),
            ("Z".to_string(), TypeDescriptor::simple(BaseType::Single)),
            ("W".to_string(), TypeDescriptor::simple(BaseType::Single)),
        ];
        assert_eq!(classify_simd(&fields), Some(SimdInfo::V4S));
    }

    #[test]
    fn mixed_field_types_are_not_simd() {
        let fields = vec![
            ("X".to_string(), TypeDescriptor::simple(BaseType::Single)),
            ("NAME".to_string(), TypeDescriptor::simple(BaseType::String)),
        ];
        assert_eq!(classify_simd(&fields), None);
    }

    #[test]
    fn layout_offsets_are_sequential() {
        let fields = vec![
            ("A".to_string(), TypeDescriptor::simple(BaseType::Byte)),
            ("B".to_string(), TypeDescriptor::simple(BaseType::Long)),
        ];
        let (layout, size) = layout_udt_fields(&fields);
        assert_eq!(layout[0].offset, 0);
        assert_eq!(layout[1].offset, 1);
        assert_eq!(size, 9);
    }

    #[test]
    fn class_without_parent_starts_after_header() {
        let decl = ClassDecl {
            name: "Animal".to_string(),
            parent: None,
            fields: vec![crate::ast::Field {
                name: "Age".to_string(),
                ty: TypeDescriptor::simple(BaseType::Integer),
            }],
            methods: vec![],
            constructor: None,
            destructor: None,
            location: crate::token::Location::default(),
        };
        let info = layout_class(&decl, None, 0);
        assert_eq!(info.layout[0].offset, CLASS_HEADER_SIZE);
    }

    #[test]
    fn override_reuses_parent_vtable_slot() {
        use crate::ast::MethodDecl;
        let parent_decl = ClassDecl {
            name: "Animal".to_string(),
            parent: None,
            fields: vec![],
            methods: vec![MethodDecl {
                name: "Speak".to_string(),
                params: vec![],
                return_type: None,
                body: vec![],
                is_override: false,
                location: crate::token::Location::default(),
            }],
            constructor: None,
            destructor: None,
            location: crate::token::Location::default(),
        };
        let parent_info = layout_class(&parent_decl, None, 0);
        let child_decl = ClassDecl {
            name: "Dog".to_string(),
            parent: Some("Animal".to_string()),
            fields: vec![],
            methods: vec![MethodDecl {
                name: "Speak".to_string(),
                params: vec![],
                return_type: None,
                body: vec![],
                is_override: true,
                location: crate::token::Location::default(),
            }],
            constructor: None,
            destructor: None,
            location: crate::token::Location::default(),
        };
        let child_info = layout_class(&child_decl, Some(&parent_info), 1);
        assert_eq!(child_info.vtable.len(), 1);
        assert_eq!(child_info.vtable[0].vtable_index, 0);
        assert_eq!(child_info.vtable[0].declaring_class, "Dog");
    }
}
