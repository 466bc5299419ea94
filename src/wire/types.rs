//! Postgres type descriptors used to drive the wire codec.

/// A Postgres object identifier.
pub type Oid = u32;

/// Well-known OIDs of the built-in types.
pub mod oid {
    use super::Oid;

    pub const BOOL: Oid = 16;
    pub const BYTEA: Oid = 17;
    pub const CHAR: Oid = 18;
    pub const NAME: Oid = 19;
    pub const INT8: Oid = 20;
    pub const INT2: Oid = 21;
    pub const INT4: Oid = 23;
    pub const REGPROC: Oid = 24;
    pub const TEXT: Oid = 25;
    pub const OID: Oid = 26;
    pub const XID: Oid = 28;
    pub const JSON: Oid = 114;
    pub const FLOAT4: Oid = 700;
    pub const FLOAT8: Oid = 701;
    pub const UNKNOWN: Oid = 705;
    pub const BPCHAR: Oid = 1042;
    pub const VARCHAR: Oid = 1043;
    pub const DATE: Oid = 1082;
    pub const TIME: Oid = 1083;
    pub const TIMESTAMP: Oid = 1114;
    pub const TIMESTAMPTZ: Oid = 1184;
    pub const INTERVAL: Oid = 1186;
    pub const TIMETZ: Oid = 1266;
    pub const BIT: Oid = 1560;
    pub const VARBIT: Oid = 1562;
    pub const NUMERIC: Oid = 1700;
    pub const REGCLASS: Oid = 2205;
    pub const REGTYPE: Oid = 2206;
    pub const UUID: Oid = 2950;
    pub const JSONB: Oid = 3802;
}

/// The built-in scalar types understood by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseType {
    Bool,
    Bytea,
    /// The single-byte `"char"` type.
    InternalChar,
    Name,
    Int8,
    Int2,
    Int4,
    Regproc,
    Text,
    Oid,
    Xid,
    Json,
    Float4,
    Float8,
    Unknown,
    BpChar,
    VarChar,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Interval,
    TimeTz,
    Bit,
    VarBit,
    Numeric,
    Regclass,
    Regtype,
    Uuid,
    Jsonb,
}

/// (type, oid, array oid, name, typlen)
const BASE_TYPES: &[(BaseType, Oid, Oid, &str, i16)] = &[
    (BaseType::Bool, oid::BOOL, 1000, "bool", 1),
    (BaseType::Bytea, oid::BYTEA, 1001, "bytea", -1),
    (BaseType::InternalChar, oid::CHAR, 1002, "char", 1),
    (BaseType::Name, oid::NAME, 1003, "name", 64),
    (BaseType::Int8, oid::INT8, 1016, "int8", 8),
    (BaseType::Int2, oid::INT2, 1005, "int2", 2),
    (BaseType::Int4, oid::INT4, 1007, "int4", 4),
    (BaseType::Regproc, oid::REGPROC, 1008, "regproc", 4),
    (BaseType::Text, oid::TEXT, 1009, "text", -1),
    (BaseType::Oid, oid::OID, 1028, "oid", 4),
    (BaseType::Xid, oid::XID, 1011, "xid", 4),
    (BaseType::Json, oid::JSON, 199, "json", -1),
    (BaseType::Float4, oid::FLOAT4, 1021, "float4", 4),
    (BaseType::Float8, oid::FLOAT8, 1022, "float8", 8),
    (BaseType::Unknown, oid::UNKNOWN, 0, "unknown", -2),
    (BaseType::BpChar, oid::BPCHAR, 1014, "bpchar", -1),
    (BaseType::VarChar, oid::VARCHAR, 1015, "varchar", -1),
    (BaseType::Date, oid::DATE, 1182, "date", 4),
    (BaseType::Time, oid::TIME, 1183, "time", 8),
    (BaseType::Timestamp, oid::TIMESTAMP, 1115, "timestamp", 8),
    (BaseType::TimestampTz, oid::TIMESTAMPTZ, 1185, "timestamptz", 8),
    (BaseType::Interval, oid::INTERVAL, 1187, "interval", 16),
    (BaseType::TimeTz, oid::TIMETZ, 1270, "timetz", 12),
    (BaseType::Bit, oid::BIT, 1561, "bit", -1),
    (BaseType::VarBit, oid::VARBIT, 1563, "varbit", -1),
    (BaseType::Numeric, oid::NUMERIC, 1231, "numeric", -1),
    (BaseType::Regclass, oid::REGCLASS, 2210, "regclass", 4),
    (BaseType::Regtype, oid::REGTYPE, 2211, "regtype", 4),
    (BaseType::Uuid, oid::UUID, 2951, "uuid", 16),
    (BaseType::Jsonb, oid::JSONB, 3807, "jsonb", -1),
];

/// SQL spellings accepted by [`BaseType::from_name`] in addition to the catalog names.
const ALIASES: &[(&str, BaseType)] = &[
    ("boolean", BaseType::Bool),
    ("smallint", BaseType::Int2),
    ("integer", BaseType::Int4),
    ("int", BaseType::Int4),
    ("bigint", BaseType::Int8),
    ("real", BaseType::Float4),
    ("double precision", BaseType::Float8),
    ("float", BaseType::Float8),
    ("decimal", BaseType::Numeric),
    ("character varying", BaseType::VarChar),
    ("character", BaseType::BpChar),
    ("timestamp without time zone", BaseType::Timestamp),
    ("timestamp with time zone", BaseType::TimestampTz),
    ("time without time zone", BaseType::Time),
    ("time with time zone", BaseType::TimeTz),
    ("bit varying", BaseType::VarBit),
];

impl BaseType {
    fn entry(self) -> &'static (BaseType, Oid, Oid, &'static str, i16) {
        BASE_TYPES
            .iter()
            .find(|entry| entry.0 == self)
            .unwrap_or(&BASE_TYPES[0])
    }

    pub fn oid(self) -> Oid {
        self.entry().1
    }

    /// OID of the one-dimensional array type, or 0 if the type has none.
    pub fn array_oid(self) -> Oid {
        self.entry().2
    }

    pub fn name(self) -> &'static str {
        self.entry().3
    }

    /// The `typlen` reported in RowDescription: fixed width, -1 for varlena, -2 for C strings.
    pub fn type_size(self) -> i16 {
        self.entry().4
    }

    pub fn from_oid(oid: Oid) -> Option<Self> {
        BASE_TYPES.iter().find(|e| e.1 == oid).map(|e| e.0)
    }

    fn from_array_oid(oid: Oid) -> Option<Self> {
        BASE_TYPES
            .iter()
            .find(|e| e.2 != 0 && e.2 == oid)
            .map(|e| e.0)
    }

    /// Resolves a SQL type name such as `int4`, `integer` or `timestamp with time zone`.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        BASE_TYPES
            .iter()
            .find(|e| e.3 == name)
            .map(|e| e.0)
            .or_else(|| ALIASES.iter().find(|(a, _)| *a == name).map(|(_, t)| *t))
    }

    /// Whether values of this type are carried as plain strings.
    pub fn is_textual(self) -> bool {
        matches!(
            self,
            BaseType::Text
                | BaseType::VarChar
                | BaseType::BpChar
                | BaseType::Name
                | BaseType::Json
                | BaseType::Jsonb
                | BaseType::Unknown
                | BaseType::InternalChar
        )
    }

    /// Whether values of this type are object identifiers resolved through the OID cache.
    pub fn is_oid_family(self) -> bool {
        matches!(
            self,
            BaseType::Oid | BaseType::Regclass | BaseType::Regproc | BaseType::Regtype
        )
    }
}

/// A named field of a composite type.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeField {
    pub name: String,
    pub ty: PgType,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeKind {
    Base(BaseType),
    /// One-dimensional array of the element type.
    Array(Box<PgType>),
    Composite(Vec<CompositeField>),
    /// A domain over another type; encoded as its base.
    Domain(Box<PgType>),
    /// An enum with its labels in sort order.
    Enum(Vec<String>),
}

/// A fully described Postgres type, including its modifier.
#[derive(Debug, Clone, PartialEq)]
pub struct PgType {
    pub oid: Oid,
    pub name: String,
    pub kind: TypeKind,
    /// `atttypmod`; -1 when the type carries no modifier.
    pub typmod: i32,
}

impl PgType {
    pub fn base(base: BaseType) -> Self {
        Self {
            oid: base.oid(),
            name: base.name().to_string(),
            kind: TypeKind::Base(base),
            typmod: -1,
        }
    }

    /// A built-in array type whose element is `base`.
    pub fn array_of(base: BaseType) -> Self {
        Self::array(base.array_oid(), Self::base(base))
    }

    pub fn array(oid: Oid, element: PgType) -> Self {
        Self {
            oid,
            name: format!("_{}", element.name),
            kind: TypeKind::Array(Box::new(element)),
            typmod: -1,
        }
    }

    pub fn composite(oid: Oid, name: impl Into<String>, fields: Vec<CompositeField>) -> Self {
        Self {
            oid,
            name: name.into(),
            kind: TypeKind::Composite(fields),
            typmod: -1,
        }
    }

    pub fn domain(oid: Oid, name: impl Into<String>, base: PgType) -> Self {
        Self {
            oid,
            name: name.into(),
            kind: TypeKind::Domain(Box::new(base)),
            typmod: -1,
        }
    }

    pub fn enumeration(oid: Oid, name: impl Into<String>, labels: Vec<String>) -> Self {
        Self {
            oid,
            name: name.into(),
            kind: TypeKind::Enum(labels),
            typmod: -1,
        }
    }

    pub fn with_typmod(mut self, typmod: i32) -> Self {
        self.typmod = typmod;
        self
    }

    /// `numeric(precision, scale)`.
    pub fn numeric(precision: u16, scale: u16) -> Self {
        Self::base(BaseType::Numeric)
            .with_typmod((((precision as i32) << 16) | scale as i32) + VARHDRSZ)
    }

    /// Looks up a built-in scalar or array type by OID.
    pub fn from_oid(oid: Oid) -> Option<Self> {
        if let Some(base) = BaseType::from_oid(oid) {
            return Some(Self::base(base));
        }
        BaseType::from_array_oid(oid).map(Self::array_of)
    }

    /// Strips any domains, returning the type the value is actually encoded as.
    pub fn resolve(&self) -> &PgType {
        match &self.kind {
            TypeKind::Domain(inner) => inner.resolve(),
            _ => self,
        }
    }

    /// The scalar base type after resolving domains, if any.
    pub fn base_type(&self) -> Option<BaseType> {
        match &self.resolve().kind {
            TypeKind::Base(base) => Some(*base),
            _ => None,
        }
    }

    pub fn type_size(&self) -> i16 {
        match &self.kind {
            TypeKind::Base(base) => base.type_size(),
            TypeKind::Domain(inner) => inner.type_size(),
            TypeKind::Enum(_) => 4,
            TypeKind::Array(_) | TypeKind::Composite(_) => -1,
        }
    }

    /// The declared scale of a `numeric(p, s)` modifier.
    pub fn numeric_scale(&self) -> Option<u16> {
        (self.typmod != -1).then(|| ((self.typmod - VARHDRSZ) & 0xFFFF) as u16)
    }
}

/// Size of the varlena header folded into type modifiers.
const VARHDRSZ: i32 = 4;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_oid() {
        assert_eq!(PgType::from_oid(23), Some(PgType::base(BaseType::Int4)));

        let array = PgType::from_oid(1007).unwrap();
        assert_eq!(array.oid, 1007);
        assert!(matches!(&array.kind, TypeKind::Array(e) if e.oid == oid::INT4));

        assert_eq!(PgType::from_oid(999_999), None);
        // unknown has no array type
        assert_eq!(PgType::from_oid(0), None);
    }

    #[test]
    fn test_lookup_by_name() {
        assert_eq!(BaseType::from_name("INTEGER"), Some(BaseType::Int4));
        assert_eq!(BaseType::from_name("timestamptz"), Some(BaseType::TimestampTz));
        assert_eq!(
            BaseType::from_name("character varying"),
            Some(BaseType::VarChar)
        );
        assert_eq!(BaseType::from_name("geometry"), None);
    }

    #[test]
    fn test_numeric_typmod() {
        let ty = PgType::numeric(10, 3);
        assert_eq!(ty.typmod, (10 << 16 | 3) + 4);
        assert_eq!(ty.numeric_scale(), Some(3));
        assert_eq!(PgType::base(BaseType::Numeric).numeric_scale(), None);
    }

    #[test]
    fn test_resolve_domain() {
        let domain = PgType::domain(
            90_000,
            "positive_int",
            PgType::domain(90_001, "inner", PgType::base(BaseType::Int4)),
        );
        assert_eq!(domain.base_type(), Some(BaseType::Int4));
        assert_eq!(domain.type_size(), 4);
    }
}
