// src/schema/layout.rs

use arrow::datatypes::{DataType, Field, Schema as ArrowSchema};
use once_cell::sync::Lazy;
use std::sync::Arc;

use crate::error::{PipelineError, Result};

/// Declared type of one positional column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Fiscal year.
    SmallInt,
    /// Execution month, 0..=12.
    TinyInt,
    /// Budget classifier codes.
    BigInt,
    /// Monetary amounts. Every `MONTO_*` column is floating point, including
    /// the ones some source revisions declared as integers.
    Money,
    Text,
}

impl ColumnKind {
    pub fn arrow_type(self) -> DataType {
        match self {
            ColumnKind::SmallInt => DataType::Int16,
            ColumnKind::TinyInt => DataType::Int8,
            ColumnKind::BigInt => DataType::Int64,
            ColumnKind::Money => DataType::Float64,
            ColumnKind::Text => DataType::Utf8,
        }
    }
}

/// A versioned positional column contract.
///
/// Positions never shift within a version; a file whose header disagrees is
/// rejected rather than read with misaligned columns.
#[derive(Debug)]
pub struct RecordLayout {
    pub version: &'static str,
    pub columns: Vec<(&'static str, ColumnKind)>,
    pub department: usize,
    pub month: usize,
    pub amount: usize,
    schema: Arc<ArrowSchema>,
}

use ColumnKind::{BigInt, Money, SmallInt, Text, TinyInt};

const MEF_GASTO_V1: [(&str, ColumnKind); 63] = [
    ("ANO_EJE", SmallInt),
    ("MES_EJE", TinyInt),
    ("NIVEL_GOBIERNO", Text),
    ("NIVEL_GOBIERNO_NOMBRE", Text),
    ("SECTOR", Text),
    ("SECTOR_NOMBRE", Text),
    ("PLIEGO", Text),
    ("PLIEGO_NOMBRE", Text),
    ("SEC_EJEC", Text),
    ("EJECUTORA", Text),
    ("EJECUTORA_NOMBRE", Text),
    ("DEPARTAMENTO_EJECUTORA", Text),
    ("DEPARTAMENTO_EJECUTORA_NOMBRE", Text),
    ("PROVINCIA_EJECUTORA", Text),
    ("PROVINCIA_EJECUTORA_NOMBRE", Text),
    ("DISTRITO_EJECUTORA", Text),
    ("DISTRITO_EJECUTORA_NOMBRE", Text),
    ("SEC_FUNC", BigInt),
    ("PROGRAMA_PPTO", BigInt),
    ("PROGRAMA_PPTO_NOMBRE", Text),
    ("TIPO_ACT_PROY", BigInt),
    ("TIPO_ACT_PROY_NOMBRE", Text),
    ("PRODUCTO_PROYECTO", BigInt),
    ("PRODUCTO_PROYECTO_NOMBRE", Text),
    ("ACTIVIDAD_ACCION_OBRA", BigInt),
    ("ACTIVIDAD_ACCION_OBRA_NOMBRE", Text),
    ("FUNCION", Text),
    ("FUNCION_NOMBRE", Text),
    ("DIVISION_FUNCIONAL", Text),
    ("DIVISION_FUNCIONAL_NOMBRE", Text),
    ("GRUPO_FUNCIONAL", Text),
    ("GRUPO_FUNCIONAL_NOMBRE", Text),
    ("META", Text),
    ("FINALIDAD", Text),
    ("META_NOMBRE", Text),
    ("DEPARTAMENTO_META", Text),
    ("DEPARTAMENTO_META_NOMBRE", Text),
    ("FUENTE_FINANCIAMIENTO", Text),
    ("FUENTE_FINANCIAMIENTO_NOMBRE", Text),
    ("RUBRO", Text),
    ("RUBRO_NOMBRE", Text),
    ("TIPO_RECURSO", Text),
    ("TIPO_RECURSO_NOMBRE", Text),
    ("CATEGORIA_GASTO", BigInt),
    ("CATEGORIA_GASTO_NOMBRE", Text),
    ("TIPO_TRANSACCION", BigInt),
    ("GENERICA", BigInt),
    ("GENERICA_NOMBRE", Text),
    ("SUBGENERICA", BigInt),
    ("SUBGENERICA_NOMBRE", Text),
    ("SUBGENERICA_DET", BigInt),
    ("SUBGENERICA_DET_NOMBRE", Text),
    ("ESPECIFICA", BigInt),
    ("ESPECIFICA_NOMBRE", Text),
    ("ESPECIFICA_DET", BigInt),
    ("ESPECIFICA_DET_NOMBRE", Text),
    ("MONTO_PIA", Money),
    ("MONTO_PIM", Money),
    ("MONTO_CERTIFICADO", Money),
    ("MONTO_COMPROMETIDO_ANUAL", Money),
    ("MONTO_COMPROMETIDO", Money),
    ("MONTO_DEVENGADO", Money),
    ("MONTO_GIRADO", Money),
];

static MEF_GASTO_V1_LAYOUT: Lazy<RecordLayout> = Lazy::new(|| {
    RecordLayout::new(
        "mef-gasto-v1",
        MEF_GASTO_V1.to_vec(),
        "DEPARTAMENTO_EJECUTORA_NOMBRE",
        "MES_EJE",
        "MONTO_DEVENGADO",
    )
});

impl RecordLayout {
    fn new(
        version: &'static str,
        columns: Vec<(&'static str, ColumnKind)>,
        department: &str,
        month: &str,
        amount: &str,
    ) -> Self {
        let position = |name: &str| {
            let idx = columns.iter().position(|(n, _)| *n == name);
            debug_assert!(idx.is_some(), "layout {} has no column {}", version, name);
            idx.unwrap_or(usize::MAX)
        };
        let (department, month, amount) = (position(department), position(month), position(amount));

        // nullable everywhere: blank cells are legal payload, the reader
        // rejects them only on the three aggregated columns
        let fields: Vec<Field> = columns
            .iter()
            .map(|(name, kind)| Field::new(*name, kind.arrow_type(), true))
            .collect();

        Self {
            version,
            columns,
            department,
            month,
            amount,
            schema: Arc::new(ArrowSchema::new(fields)),
        }
    }

    /// The built-in layout for the open-data spending files.
    pub fn mef_gasto_v1() -> &'static RecordLayout {
        &MEF_GASTO_V1_LAYOUT
    }

    /// Look up a layout by its version tag.
    pub fn by_version(version: &str) -> Result<&'static RecordLayout> {
        match version {
            "mef-gasto-v1" => Ok(Self::mef_gasto_v1()),
            other => Err(PipelineError::InvalidArgument(format!(
                "unknown record layout `{}`",
                other
            ))),
        }
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn arrow_schema(&self) -> Arc<ArrowSchema> {
        Arc::clone(&self.schema)
    }

    pub fn column_name(&self, idx: usize) -> &'static str {
        self.columns.get(idx).map(|(n, _)| *n).unwrap_or("?")
    }

    /// True when `fields` carries this layout's names at the aggregated positions.
    pub fn is_header(&self, fields: &csv::StringRecord) -> bool {
        [self.department, self.month, self.amount]
            .iter()
            .all(|&idx| {
                fields
                    .get(idx)
                    .map(|f| f.trim().eq_ignore_ascii_case(self.column_name(idx)))
                    .unwrap_or(false)
            })
    }

    /// The canonical header line (no trailing newline).
    pub fn header_line(&self) -> String {
        self.columns
            .iter()
            .map(|(n, _)| *n)
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Build one data line for the built-in layout; inert columns get filler.
    pub fn record_line(department: &str, month: i32, amount: &str) -> String {
        let layout = RecordLayout::mef_gasto_v1();
        let mut fields: Vec<String> = layout
            .columns
            .iter()
            .map(|(_, kind)| match kind {
                ColumnKind::SmallInt => "2023".to_string(),
                ColumnKind::TinyInt => "1".to_string(),
                ColumnKind::BigInt => "42".to_string(),
                ColumnKind::Money => "0.0".to_string(),
                ColumnKind::Text => "X".to_string(),
            })
            .collect();
        fields[layout.department] = format!("\"{}\"", department);
        fields[layout.month] = month.to_string();
        fields[layout.amount] = amount.to_string();
        fields.join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_layout_positions() {
        let layout = RecordLayout::mef_gasto_v1();
        assert_eq!(layout.width(), 63);
        assert_eq!(layout.department, 12);
        assert_eq!(layout.month, 1);
        assert_eq!(layout.amount, 61);
        assert_eq!(layout.column_name(layout.amount), "MONTO_DEVENGADO");

        let schema = layout.arrow_schema();
        assert_eq!(schema.fields().len(), 63);
        assert_eq!(schema.field(layout.month).data_type(), &DataType::Int8);
        assert_eq!(schema.field(layout.amount).data_type(), &DataType::Float64);
        assert_eq!(schema.field(layout.department).data_type(), &DataType::Utf8);
        // int64 in some revisions of the source, float here
        assert_eq!(schema.field(56).data_type(), &DataType::Float64);
    }

    #[test]
    fn header_detection() {
        let layout = RecordLayout::mef_gasto_v1();
        let header = csv::StringRecord::from(layout.header_line().split(',').collect::<Vec<_>>());
        assert!(layout.is_header(&header));

        let line = fixtures::record_line("LIMA", 3, "10.5");
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(line.as_bytes());
        let data = rdr.records().next().unwrap().unwrap();
        assert!(!layout.is_header(&data));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "has no column MONTO_DEVENGAD0")]
    fn misspelled_aggregated_column_is_caught() {
        RecordLayout::new(
            "mef-gasto-v1",
            MEF_GASTO_V1.to_vec(),
            "DEPARTAMENTO_EJECUTORA_NOMBRE",
            "MES_EJE",
            "MONTO_DEVENGAD0",
        );
    }

    #[test]
    fn unknown_version_is_rejected() {
        assert!(RecordLayout::by_version("mef-gasto-v1").is_ok());
        assert!(matches!(
            RecordLayout::by_version("v0"),
            Err(PipelineError::InvalidArgument(_))
        ));
    }
}
