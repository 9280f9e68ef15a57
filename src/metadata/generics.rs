//! Generic declarations and the reference-list encoding.
//!
//! Templates never name other templates directly. Instead every type, function and
//! field position inside a template is described by an entry in a flat *reference
//! list* ([`RefEntry`]), and generic argument lists are *multilists* ([`MultiList`]) -
//! ordered segments of arguments, so that parameter packs keep their grouping.
//!
//! # Key Types
//! - [`RefEntry`] / [`RefKind`] - one tagged slot of a reference list
//! - [`MultiList`] - segmented argument list, the identity component of a specialization
//! - [`ParamCountList`] - the declared shape of a template's parameter list
//! - [`GenericDeclaration`] - everything a template declares about its generics
//! - [`Constraint`] / [`ConstraintKind`] - predicates over generic arguments

use smallvec::SmallVec;

/// The tag of a reference-list entry.
///
/// Tags marked *constraint only* may appear exclusively inside a constraint's
/// private type-reference list; the runtime evaluator rejects them elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum RefKind {
    /// Terminates an argument list; as a standalone type, represents "void".
    Empty,
    /// Terminates an argument list.
    ListEnd,
    /// Starts a new segment of an argument multilist. Immediately after an
    /// [`RefKind::Argument`] entry it instead selects that argument's segment.
    Segment,
    /// Alias for another entry in the same list; `index` is the aliased position.
    Clone,
    /// Local template reference; `index` is the template id in the owning assembly.
    /// Trailing entries up to [`RefKind::ListEnd`] are the generic arguments.
    Assembly,
    /// Same as [`RefKind::Assembly`] after resolving `index` through the import table.
    Import,
    /// Reads a previously recorded constraint export; `index` names the export
    /// through the declaration's name table.
    Constraint,
    /// Picks `arguments[segment][index]` of the current specialization.
    Argument,
    /// The type currently being specialized (or, inside a trait, the target).
    SelfType,
    /// Named member lookup on a parent type; `index` points into the name table,
    /// the next entry is the parent, then the argument list.
    Subtype,
    /// In function argument lists only: substitute an entry of the type list.
    CloneType,
    /// In field lists only: a direct field id.
    FieldId,
    /// Constraint only: the referred calculation is allowed to fail.
    Try,
    /// Constraint only: a fresh undetermined variable.
    Any,
}

/// One slot of a reference list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefEntry {
    /// What this slot describes.
    pub kind: RefKind,
    /// Tag-specific payload (template id, import id, argument index, ...).
    pub index: usize,
}

impl RefEntry {
    /// An empty ("void") slot.
    pub const EMPTY: RefEntry = RefEntry {
        kind: RefKind::Empty,
        index: 0,
    };

    /// Construct an entry from a tag and payload.
    #[must_use]
    pub fn new(kind: RefKind, index: usize) -> Self {
        RefEntry { kind, index }
    }
}

/// A segmented list of values.
///
/// Generic argument lists are lists of *segments* so that variadic parameter
/// packs keep their grouping. Equality is componentwise over both segment
/// sizes and elements; two specializations are the same exactly when their
/// multilists compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct MultiList<T> {
    items: Vec<T>,
    sizes: SmallVec<[usize; 2]>,
}

impl<T> MultiList<T> {
    /// Create an empty multilist (no segments).
    #[must_use]
    pub fn new() -> Self {
        MultiList {
            items: Vec::new(),
            sizes: SmallVec::new(),
        }
    }

    /// Create a multilist with a single one-element segment.
    #[must_use]
    pub fn single(value: T) -> Self {
        let mut list = MultiList::new();
        list.new_list();
        list.append_last(value);
        list
    }

    /// Create a multilist from explicit segments.
    #[must_use]
    pub fn from_segments(segments: Vec<Vec<T>>) -> Self {
        let mut list = MultiList::new();
        for segment in segments {
            list.new_list();
            for value in segment {
                list.append_last(value);
            }
        }
        list
    }

    /// Start a new (empty) segment.
    pub fn new_list(&mut self) {
        self.sizes.push(0);
    }

    /// Append a value to the last segment, starting one if none exists.
    pub fn append_last(&mut self, value: T) {
        if self.sizes.is_empty() {
            self.sizes.push(0);
        }
        self.items.push(value);
        *self.sizes.last_mut().unwrap() += 1;
    }

    /// The per-segment sizes.
    #[must_use]
    pub fn size_list(&self) -> &[usize] {
        &self.sizes
    }

    /// Number of segments.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.sizes.len()
    }

    /// Total number of elements across all segments.
    #[must_use]
    pub fn total_len(&self) -> usize {
        self.items.len()
    }

    /// True when the list holds exactly one segment with exactly one element.
    #[must_use]
    pub fn is_single(&self) -> bool {
        self.sizes.len() == 1 && self.sizes[0] == 1
    }

    /// Element at `(segment, index)`, if present.
    #[must_use]
    pub fn get(&self, segment: usize, index: usize) -> Option<&T> {
        if segment >= self.sizes.len() || index >= self.sizes[segment] {
            return None;
        }
        let base: usize = self.sizes[..segment].iter().sum();
        self.items.get(base + index)
    }

    /// Iterate over all elements in segment-major order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Iterate over `(segment, element)` pairs.
    pub fn iter_with_segments(&self) -> impl Iterator<Item = (usize, &T)> {
        let mut bounds = Vec::with_capacity(self.sizes.len());
        let mut acc = 0;
        for &s in &self.sizes {
            acc += s;
            bounds.push(acc);
        }
        self.items.iter().enumerate().map(move |(i, v)| {
            let segment = bounds.iter().position(|&b| i < b).unwrap_or(0);
            (segment, v)
        })
    }

    /// Map every element, preserving the segment structure.
    #[must_use]
    pub fn map<U>(&self, mut f: impl FnMut(&T) -> U) -> MultiList<U> {
        MultiList {
            items: self.items.iter().map(&mut f).collect(),
            sizes: self.sizes.clone(),
        }
    }

    /// Fallibly map every element, preserving the segment structure.
    pub fn try_map<U, E>(&self, mut f: impl FnMut(&T) -> std::result::Result<U, E>) -> std::result::Result<MultiList<U>, E> {
        let mut items = Vec::with_capacity(self.items.len());
        for item in &self.items {
            items.push(f(item)?);
        }
        Ok(MultiList {
            items,
            sizes: self.sizes.clone(),
        })
    }
}

/// One segment of a declared parameter list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSegment {
    /// Declared size; for variable segments, the minimum size.
    pub size: usize,
    /// Whether the segment accepts more arguments than `size`.
    pub variable: bool,
}

/// The declared shape of a template's generic parameter list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParamCountList {
    /// Segment declarations, in order.
    pub segments: Vec<ParamSegment>,
}

impl ParamCountList {
    /// A parameter list with no segments (a non-generic template).
    #[must_use]
    pub fn empty() -> Self {
        ParamCountList { segments: Vec::new() }
    }

    /// A single fixed segment of `n` parameters. `n == 0` yields the empty list
    /// (legacy encoders never emitted zero-size segments).
    #[must_use]
    pub fn fixed(n: usize) -> Self {
        if n == 0 {
            return Self::empty();
        }
        ParamCountList {
            segments: vec![ParamSegment { size: n, variable: false }],
        }
    }

    /// True when no segments are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// True when the declaration is exactly one fixed parameter.
    #[must_use]
    pub fn is_single(&self) -> bool {
        self.segments.len() == 1 && self.segments[0].size == 1 && !self.segments[0].variable
    }

    /// Whether an argument list with the given per-segment sizes satisfies this
    /// declaration.
    #[must_use]
    pub fn can_match(&self, sizes: &[usize]) -> bool {
        // Backward compatibility (temporary): ignore an empty single dimension.
        if sizes.len() == 1 && sizes[0] == 0 {
            if self.is_empty() {
                return true;
            }
            if self.segments.len() == 1 && self.segments[0].size == 0 && !self.segments[0].variable {
                return true;
            }
            return false;
        }

        if self.segments.len() != sizes.len() {
            return false;
        }
        for (segment, &size) in self.segments.iter().zip(sizes) {
            if segment.variable {
                if size < segment.size {
                    return false;
                }
            } else if size != segment.size {
                return false;
            }
        }
        true
    }
}

/// The predicate kind of a generic constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ConstraintKind {
    /// The target must be instantiable.
    Exist,
    /// The single argument and the target resolve to the same runtime type.
    Same,
    /// The single argument is on the target's base chain (reflexive).
    Base,
    /// The single argument is in the target's interface set.
    Interface,
    /// The target satisfies a trait defined in the same assembly; `index` is the
    /// trait template id.
    TraitLocal,
    /// The target satisfies an imported trait; `index` is the trait import id.
    TraitImport,
}

impl ConstraintKind {
    /// Whether this constraint resolves a trait.
    #[must_use]
    pub fn is_trait(self) -> bool {
        matches!(self, ConstraintKind::TraitLocal | ConstraintKind::TraitImport)
    }
}

/// One declared constraint of a generic template.
///
/// The constraint carries its own private reference list; `target` and
/// `arguments` index into it. Entries may use [`RefKind::Any`] (fresh solver
/// variable) and [`RefKind::Try`] (tolerated failure) in addition to the
/// ordinary tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    /// The predicate to check.
    pub kind: ConstraintKind,
    /// Trait template or trait import id for trait kinds; unused otherwise.
    pub index: usize,
    /// The constraint's private reference list.
    pub type_references: Vec<RefEntry>,
    /// Name table for [`RefKind::Subtype`] entries in `type_references`.
    pub names: Vec<String>,
    /// Index of the checked target inside `type_references`.
    pub target: usize,
    /// Indices of the constraint arguments inside `type_references`.
    pub arguments: Vec<usize>,
    /// Prefix under which satisfied-member exports are published.
    pub export_name: String,
}

/// Everything a template declares about its generic parameters.
#[derive(Debug, Clone, Default)]
pub struct GenericDeclaration {
    /// Declared parameter-list shape.
    pub parameter_count: ParamCountList,
    /// Constraints checked before any specialization is created.
    pub constraints: Vec<Constraint>,
    /// Reference list describing every type the template mentions.
    pub types: Vec<RefEntry>,
    /// Reference list describing every function the template mentions.
    pub functions: Vec<RefEntry>,
    /// Reference list describing every field the template mentions.
    pub fields: Vec<RefEntry>,
    /// Name table shared by `Subtype` and `Constraint` entries.
    pub names: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multilist_segments() {
        let mut list: MultiList<u32> = MultiList::new();
        assert_eq!(list.segment_count(), 0);
        assert_eq!(list.total_len(), 0);

        list.new_list();
        list.append_last(1);
        list.append_last(2);
        list.new_list();
        list.append_last(3);

        assert_eq!(list.size_list(), &[2, 1]);
        assert_eq!(list.get(0, 0), Some(&1));
        assert_eq!(list.get(0, 1), Some(&2));
        assert_eq!(list.get(1, 0), Some(&3));
        assert_eq!(list.get(1, 1), None);
        assert_eq!(list.get(2, 0), None);
        assert!(!list.is_single());

        let single = MultiList::single(9u32);
        assert!(single.is_single());
        assert_eq!(single.get(0, 0), Some(&9));
    }

    #[test]
    fn test_multilist_equality() {
        let a = MultiList::from_segments(vec![vec![1, 2], vec![3]]);
        let b = MultiList::from_segments(vec![vec![1, 2], vec![3]]);
        let c = MultiList::from_segments(vec![vec![1, 2, 3]]);
        assert_eq!(a, b);
        // Same elements, different segmentation: not equal.
        assert_ne!(a, c);
    }

    #[test]
    fn test_multilist_map() {
        let a = MultiList::from_segments(vec![vec![1u32], vec![2, 3]]);
        let b = a.map(|v| v * 10);
        assert_eq!(b.size_list(), &[1, 2]);
        assert_eq!(b.get(1, 1), Some(&30));

        let segments: Vec<(usize, &u32)> = a.iter_with_segments().collect();
        assert_eq!(segments, vec![(0, &1), (1, &2), (1, &3)]);
    }

    #[test]
    fn test_param_count_fixed() {
        let p = ParamCountList::fixed(2);
        assert!(p.can_match(&[2]));
        assert!(!p.can_match(&[1]));
        assert!(!p.can_match(&[2, 1]));
        assert!(!p.can_match(&[]));

        assert!(ParamCountList::fixed(1).is_single());
        assert!(!ParamCountList::fixed(2).is_single());
    }

    #[test]
    fn test_param_count_legacy_empty_dimension() {
        // A single zero-size argument dimension matches an empty declaration.
        let empty = ParamCountList::empty();
        assert!(empty.can_match(&[0]));
        assert!(empty.can_match(&[]));
        assert!(!empty.can_match(&[1]));

        let zero = ParamCountList {
            segments: vec![ParamSegment { size: 0, variable: false }],
        };
        assert!(zero.can_match(&[0]));

        let one = ParamCountList::fixed(1);
        assert!(!one.can_match(&[0]));
    }

    #[test]
    fn test_param_count_variable_segment() {
        let p = ParamCountList {
            segments: vec![
                ParamSegment { size: 1, variable: false },
                ParamSegment { size: 2, variable: true },
            ],
        };
        assert!(p.can_match(&[1, 2]));
        assert!(p.can_match(&[1, 5]));
        assert!(!p.can_match(&[1, 1]));
        assert!(!p.can_match(&[2, 2]));
    }
}
