// src/schema/mod.rs

//! In-memory schema document.
//!
//! A schema is an owned value tree rooted at an implicit document node.
//! Each named field carries a [`Node`]: its type set, presence statistics,
//! object children (when `object` is among the types), and an `items` child
//! (always present when `array` is among the types). Statistics are
//! advisory; two schemas are equal iff their trees are isomorphic with
//! identical type sets and identical derived `required` flags.

pub mod file;
pub mod types;

pub use file::SchemaStore;
pub use types::{BsonType, FieldPath, TypeSet};

/// Presence at or above this fraction derives `required` (together with a
/// zero null rate).
pub const REQUIRED_PRESENCE: f64 = 0.999;

/// A named field and its node.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub node: Node,
}

impl Field {
    pub fn new(name: impl Into<String>, node: Node) -> Self {
        Field { name: name.into(), node }
    }
}

/// One node of the schema tree.
#[derive(Debug, Clone)]
pub struct Node {
    /// Observed type tags, ordered by frequency.
    pub types: TypeSet,
    /// Fraction of parent containers in which the field was observed.
    /// Null observations count as present.
    pub presence: f64,
    /// Fraction of observations whose value was null.
    pub null_rate: f64,
    /// Denominator behind the statistics.
    pub sample_count: u64,
    /// Object children; non-empty only when `object` is among the types.
    pub fields: Vec<Field>,
    /// Array items child; `Some` exactly when `array` is among the types.
    pub items: Option<Box<Node>>,
}

impl Node {
    /// A leaf node with full presence and no observed nulls.
    pub fn leaf(types: TypeSet) -> Self {
        Node {
            types,
            presence: 1.0,
            null_rate: 0.0,
            sample_count: 0,
            fields: Vec::new(),
            items: None,
        }
    }

    pub fn object(fields: Vec<Field>) -> Self {
        Node { fields, ..Node::leaf(TypeSet::of(BsonType::Object)) }
    }

    pub fn array(items: Node) -> Self {
        Node {
            items: Some(Box::new(items)),
            ..Node::leaf(TypeSet::of(BsonType::Array))
        }
    }

    pub fn with_presence(mut self, presence: f64, null_rate: f64) -> Self {
        self.presence = presence;
        self.null_rate = null_rate;
        self
    }

    /// Derived, never stored: present (almost) everywhere and never null.
    pub fn required(&self) -> bool {
        self.presence >= REQUIRED_PRESENCE && self.null_rate == 0.0 && !self.types.nullable()
    }

    fn structure_eq(&self, other: &Node) -> bool {
        if self.types != other.types || self.required() != other.required() {
            return false;
        }
        match (&self.items, &other.items) {
            (Some(a), Some(b)) if !a.structure_eq(b) => return false,
            (Some(_), None) | (None, Some(_)) => return false,
            _ => {}
        }
        fields_structure_eq(&self.fields, &other.fields)
    }
}

fn fields_structure_eq(a: &[Field], b: &[Field]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    // Compare by name so that equality is insensitive to statistics-driven
    // ordering differences between two samples of the same collection.
    a.iter().all(|fa| {
        b.iter()
            .find(|fb| fb.name == fa.name)
            .is_some_and(|fb| fa.node.structure_eq(&fb.node))
    })
}

/// A schema: the ordered fields of the implicit root document node.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        let mut schema = Schema { fields };
        schema.sort_canonical();
        schema
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Sort every object level by descending presence, then field name.
    pub fn sort_canonical(&mut self) {
        sort_fields(&mut self.fields);
    }

    /// Look up a node by dotted path, descending through object children.
    pub fn get(&self, path: &FieldPath) -> Option<&Node> {
        let mut fields = &self.fields;
        let mut found: Option<&Node> = None;
        for segment in path.segments() {
            let field = fields.iter().find(|f| f.name == *segment)?;
            found = Some(&field.node);
            fields = &field.node.fields;
        }
        found
    }

    /// Total number of named fields at every depth, including object
    /// children nested under array items.
    pub fn field_count(&self) -> usize {
        fn count(fields: &[Field]) -> usize {
            fields
                .iter()
                .map(|f| {
                    1 + count(&f.node.fields)
                        + f.node.items.as_ref().map_or(0, |it| count(&it.fields))
                })
                .sum()
        }
        count(&self.fields)
    }

    /// Preorder walk over all named fields, object children included.
    pub fn walk<F: FnMut(&FieldPath, &Node)>(&self, visit: &mut F) {
        fn rec<F: FnMut(&FieldPath, &Node)>(fields: &[Field], path: &FieldPath, visit: &mut F) {
            for field in fields {
                let child = path.child(&field.name);
                visit(&child, &field.node);
                rec(&field.node.fields, &child, visit);
            }
        }
        rec(&self.fields, &FieldPath::root(), visit);
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        fields_structure_eq(&self.fields, &other.fields)
    }
}

fn sort_fields(fields: &mut [Field]) {
    fields.sort_by(|a, b| {
        b.node
            .presence
            .total_cmp(&a.node.presence)
            .then_with(|| a.name.cmp(&b.name))
    });
    for field in fields.iter_mut() {
        sort_fields(&mut field.node.fields);
        if let Some(items) = field.node.items.as_mut() {
            sort_fields(&mut items.fields);
        }
    }
}
