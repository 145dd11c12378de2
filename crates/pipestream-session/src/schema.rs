use pipestream_codec::ColumnType;

use crate::error::{Result, SessionError};
use crate::settings::{StreamSettings, TransferFormat};

/// One output dimension. `end == None` means unbounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dimension {
    pub name: String,
    pub start: i64,
    pub end: Option<i64>,
    pub chunk_length: u64,
}

/// One nullable output attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub ty: ColumnType,
    pub nullable: bool,
}

/// Shape of the data a stream produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSchema {
    pub dimensions: Vec<Dimension>,
    pub attributes: Vec<Attribute>,
}

impl OutputSchema {
    /// Output of a stream running on `instance_count` instances.
    ///
    /// Every layout has `instance_id` and `chunk_no`; `df` and `feather` add
    /// `value_no` with the configured chunk size.
    pub fn infer(settings: &StreamSettings, instance_count: usize) -> Result<Self> {
        if instance_count == 0 {
            return Err(SessionError::settings("instance count must be positive"));
        }
        let last_instance = i64::try_from(instance_count - 1)
            .map_err(|_| SessionError::settings("instance count out of range"))?;

        let mut dimensions = vec![
            Dimension {
                name: "instance_id".to_string(),
                start: 0,
                end: Some(last_instance),
                chunk_length: 1,
            },
            Dimension {
                name: "chunk_no".to_string(),
                start: 0,
                end: None,
                chunk_length: 1,
            },
        ];
        if settings.format() != TransferFormat::Tsv {
            dimensions.push(Dimension {
                name: "value_no".to_string(),
                start: 0,
                end: None,
                chunk_length: settings.chunk_size(),
            });
        }

        let attributes = settings
            .names()
            .iter()
            .zip(settings.types())
            .map(|(name, &ty)| Attribute {
                name: name.clone(),
                ty,
                nullable: true,
            })
            .collect();

        Ok(Self {
            dimensions,
            attributes,
        })
    }

    pub fn attribute_types(&self) -> Vec<ColumnType> {
        self.attributes.iter().map(|a| a.ty).collect()
    }

    pub fn attribute_names(&self) -> Vec<&str> {
        self.attributes.iter().map(|a| a.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tsv_layout() {
        let settings = StreamSettings::parse("cat", ["names=(out)"]).unwrap();
        let schema = OutputSchema::infer(&settings, 4).unwrap();
        let dims: Vec<_> = schema.dimensions.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(dims, ["instance_id", "chunk_no"]);
        assert_eq!(schema.dimensions[0].end, Some(3));
        assert_eq!(schema.attribute_names(), ["out"]);
        assert_eq!(schema.attribute_types(), [ColumnType::String]);
    }

    #[test]
    fn df_layout() {
        let settings =
            StreamSettings::parse("cat", ["format=df", "types=int32,double", "chunk_size=500"])
                .unwrap();
        let schema = OutputSchema::infer(&settings, 1).unwrap();
        assert_eq!(schema.dimensions.len(), 3);
        assert_eq!(schema.dimensions[2].name, "value_no");
        assert_eq!(schema.dimensions[2].chunk_length, 500);
        assert_eq!(schema.attribute_names(), ["a0", "a1"]);
        assert!(schema.attributes.iter().all(|a| a.nullable));
    }

    #[test]
    fn zero_instances_rejected() {
        let settings = StreamSettings::parse("cat", Vec::<String>::new()).unwrap();
        assert!(OutputSchema::infer(&settings, 0).is_err());
    }
}
