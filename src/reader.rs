//! Field extraction for located messages.
//!
//! Reads the bytes of a message straight from its recorded offset, hands
//! them to the decoder and turns the result into a masked [`GridField`]
//! with analysis and forecast timestamps.

use crate::constants::{MISSING_VALUE, keys};
use crate::decoder::{Decoder, RawMessage};
use crate::error::{GridCheckError, Result};
use crate::index::MessageIndex;
use crate::models::{GridField, MessageLocation, ParameterDefinition, describe_conditions};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;
use tracing::{debug, warn};

/// Reads field values for located messages
#[derive(Clone)]
pub struct FieldReader {
    decoder: Arc<dyn Decoder>,
}

impl FieldReader {
    pub fn new(decoder: Arc<dyn Decoder>) -> Self {
        Self { decoder }
    }

    /// Decode one message and mask its missing values
    pub fn read(&self, location: &MessageLocation, parameter: &str) -> Result<GridField> {
        let mut file = File::open(&location.file).map_err(|source| GridCheckError::FileOpen {
            path: location.file.clone(),
            source,
        })?;
        file.seek(SeekFrom::Start(location.offset))?;

        let mut bytes = vec![0u8; location.length as usize];
        file.read_exact(&mut bytes)?;

        let message = self.decoder.parse(bytes)?;
        let values = message
            .values()?
            .into_iter()
            .map(|v| if v == MISSING_VALUE || v.is_nan() { None } else { Some(v) })
            .collect();

        let analysis_time = analysis_time(message.as_ref())?;
        let end_step = message
            .scalar(keys::END_STEP)
            .ok_or_else(|| GridCheckError::decode("message has no endStep"))?;

        Ok(GridField {
            parameter: parameter.to_string(),
            values,
            analysis_time,
            forecast_time: analysis_time + Duration::hours(end_step),
        })
    }

    /// Read every parameter, or nothing at all
    ///
    /// If any parameter has no message in the index, or its message cannot
    /// be decoded, the problem is logged and an empty list is returned so
    /// the combination is skipped. I/O failures are still errors.
    pub fn read_parameters(
        &self,
        index: &MessageIndex,
        parameters: &[ParameterDefinition],
    ) -> Result<Vec<GridField>> {
        let mut fields = Vec::with_capacity(parameters.len());
        let mut missing = Vec::new();
        let mut undecodable = false;

        for param in parameters {
            match index.lookup(&param.conditions) {
                Some(location) => {
                    debug!("Read {}", describe_conditions(&param.conditions));
                    match self.read(location, &param.name) {
                        Ok(field) => fields.push(field),
                        Err(GridCheckError::Decode { reason }) => {
                            warn!(
                                "Unable to decode data for '{}' (message {} of {}): {}",
                                param.name,
                                location.message_no,
                                location.file.display(),
                                reason
                            );
                            undecodable = true;
                        }
                        Err(e) => return Err(e),
                    }
                }
                None => missing.push(param),
            }
        }

        if undecodable || !missing.is_empty() {
            for param in missing {
                warn!(
                    "Unable to find data for '{}': {}",
                    param.name,
                    describe_conditions(&param.conditions)
                );
            }
            return Ok(Vec::new());
        }

        Ok(fields)
    }
}

/// Reference time from `dataDate` (YYYYMMDD) and `dataTime` (HHMM)
fn analysis_time(message: &dyn RawMessage) -> Result<NaiveDateTime> {
    let date = message
        .scalar(keys::DATA_DATE)
        .ok_or_else(|| GridCheckError::decode("message has no dataDate"))?;
    let time = message.scalar(keys::DATA_TIME).unwrap_or(0);

    NaiveDate::from_ymd_opt((date / 10_000) as i32, (date / 100 % 100) as u32, (date % 100) as u32)
        .and_then(|d| d.and_hms_opt((time / 100) as u32, (time % 100) as u32, 0))
        .ok_or_else(|| GridCheckError::decode(format!("invalid reference time {date} {time:04}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::MessageStream;
    use crate::constants::INDEX_KEYS;
    use crate::models::{Condition, IndexKey};
    use std::io::Write;
    use std::path::{Path, PathBuf};
    use tempfile::NamedTempFile;

    /// Messages are one byte per value on disk; 255 stands for the sentinel
    struct ByteDecoder;

    struct ByteMessage(Vec<u8>);

    impl RawMessage for ByteMessage {
        fn scalar(&self, key: &str) -> Option<i64> {
            match key {
                "dataDate" => Some(20240301),
                "dataTime" => Some(600),
                "endStep" => Some(self.0.len() as i64),
                _ => None,
            }
        }

        fn values(&self) -> Result<Vec<f64>> {
            if self.0.contains(&254) {
                return Err(GridCheckError::decode("unsupported packing"));
            }
            Ok(self
                .0
                .iter()
                .map(|b| if *b == 255 { MISSING_VALUE } else { f64::from(*b) })
                .collect())
        }

        fn total_length(&self) -> u64 {
            self.0.len() as u64
        }
    }

    impl Decoder for ByteDecoder {
        fn open(&self, _path: &Path) -> Result<MessageStream> {
            unimplemented!()
        }

        fn parse(&self, bytes: Vec<u8>) -> Result<Box<dyn RawMessage>> {
            Ok(Box::new(ByteMessage(bytes)))
        }
    }

    fn location(file: &Path, offset: u64, length: u64) -> MessageLocation {
        MessageLocation {
            file: file.to_path_buf(),
            message_no: 0,
            offset,
            length,
        }
    }

    #[test]
    fn test_read_masks_sentinel_and_sets_times() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[9, 9, 1, 255, 3]).unwrap();

        let reader = FieldReader::new(Arc::new(ByteDecoder));
        let field = reader.read(&location(file.path(), 2, 3), "t2").unwrap();

        assert_eq!(field.parameter, "t2");
        assert_eq!(field.values, vec![Some(1.0), None, Some(3.0)]);
        assert_eq!(field.analysis_time.to_string(), "2024-03-01 06:00:00");
        assert_eq!(field.forecast_time.to_string(), "2024-03-01 09:00:00");
    }

    #[test]
    fn test_unreadable_file_is_fatal() {
        let reader = FieldReader::new(Arc::new(ByteDecoder));
        let result = reader.read(&location(&PathBuf::from("/nonexistent/x.grib2"), 0, 1), "t2");
        assert!(matches!(result, Err(GridCheckError::FileOpen { .. })));
    }

    #[test]
    fn test_undecodable_message_yields_no_fields() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[1, 2, 254, 4]).unwrap();

        let conditions: Vec<Condition> = INDEX_KEYS
            .iter()
            .map(|key| Condition::new(*key, Some(1)))
            .collect();
        let mut index = MessageIndex::new();
        index.insert(
            IndexKey::from_conditions(&conditions).unwrap(),
            location(file.path(), 2, 2),
        );

        let reader = FieldReader::new(Arc::new(ByteDecoder));
        let params = vec![ParameterDefinition::new("tp", conditions)];
        let fields = reader.read_parameters(&index, &params).unwrap();
        assert!(fields.is_empty());
    }

    #[test]
    fn test_read_parameters_is_all_or_nothing() {
        let reader = FieldReader::new(Arc::new(ByteDecoder));
        let index = MessageIndex::new();
        let params = vec![ParameterDefinition::new(
            "t2",
            vec![Condition::new("level", Some(2))],
        )];

        let fields = reader.read_parameters(&index, &params).unwrap();
        assert!(fields.is_empty());
    }
}
