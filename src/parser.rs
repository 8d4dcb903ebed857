use crate::db::models::{CropReading, WeatherReading};
use crate::error::{AppError, Result};
use chrono::NaiveDate;
use std::path::Path;

/// Sentinel used by the source files for "no measurement".
const MISSING_VALUE: i64 = -9999;

const WEATHER_FIELD_COUNT: usize = 4;
const CROP_FIELD_COUNT: usize = 2;

pub struct Parser;

impl Parser {
    /// Parse a weather data file into its station identity and readings.
    ///
    /// The station identifier is the file name without extension or path; it
    /// is not present in the file content. Any malformed line aborts the
    /// whole file.
    pub fn parse_weather_file(path: &Path) -> Result<(String, Vec<WeatherReading>)> {
        let station_id = station_from_path(path)?;
        let content = std::fs::read_to_string(path)?;
        let readings = Self::parse_weather(&content).map_err(|e| with_path(e, path))?;
        Ok((station_id, readings))
    }

    /// Parse weather file content: one `YYYYMMDD\tmax\tmin\tprecip` record
    /// per line, integer fields, -9999 meaning missing. Blank lines are
    /// ignored.
    pub fn parse_weather(content: &str) -> Result<Vec<WeatherReading>> {
        let mut readings = Vec::new();

        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }

            let reading =
                Self::parse_weather_line(line).map_err(|e| with_line(e, line_num + 1))?;
            readings.push(reading);
        }

        Ok(readings)
    }

    /// Parse a crop yield data file. Any malformed line aborts the whole
    /// file.
    pub fn parse_crop_file(path: &Path) -> Result<Vec<CropReading>> {
        let content = std::fs::read_to_string(path)?;
        Self::parse_crop(&content).map_err(|e| with_path(e, path))
    }

    /// Parse crop yield file content: one `year\ttotal_yield` record per
    /// line, both integers, yield non-negative. Blank lines are ignored.
    pub fn parse_crop(content: &str) -> Result<Vec<CropReading>> {
        let mut readings = Vec::new();

        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }

            let reading = Self::parse_crop_line(line).map_err(|e| with_line(e, line_num + 1))?;
            readings.push(reading);
        }

        Ok(readings)
    }

    fn parse_weather_line(line: &str) -> Result<WeatherReading> {
        let fields: Vec<&str> = line.split('\t').collect();

        if fields.len() != WEATHER_FIELD_COUNT {
            return Err(AppError::Parse(format!(
                "Expected {} tab-separated fields, got {}",
                WEATHER_FIELD_COUNT,
                fields.len()
            )));
        }

        let date = parse_date(fields[0])?;
        let max_temp = parse_metric(fields[1])?;
        let min_temp = parse_metric(fields[2])?;
        let precipitation = parse_metric(fields[3])?;

        Ok(WeatherReading {
            date,
            max_temp,
            min_temp,
            precipitation,
        })
    }

    fn parse_crop_line(line: &str) -> Result<CropReading> {
        let fields: Vec<&str> = line.split('\t').collect();

        if fields.len() != CROP_FIELD_COUNT {
            return Err(AppError::Parse(format!(
                "Expected {} tab-separated fields, got {}",
                CROP_FIELD_COUNT,
                fields.len()
            )));
        }

        let year = parse_int(fields[0])?;
        let total_yield = parse_int(fields[1])?;

        if !(1..=9999).contains(&year) {
            return Err(AppError::Parse(format!(
                "Year {} out of valid range (1-9999)",
                year
            )));
        }
        let year = year as i32;

        if total_yield < 0 {
            return Err(AppError::Parse(format!(
                "Total yield {} must be non-negative",
                total_yield
            )));
        }

        Ok(CropReading { year, total_yield })
    }
}

/// Derive the station identifier from a weather file path: the file name
/// without extension.
pub fn station_from_path(path: &Path) -> Result<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .ok_or_else(|| {
            AppError::InvalidData(format!(
                "Cannot derive station identifier from file name '{}'",
                path.display()
            ))
        })
}

fn with_line(e: AppError, line_num: usize) -> AppError {
    match e {
        AppError::Parse(msg) => AppError::Parse(format!("line {}: {}", line_num, msg)),
        other => other,
    }
}

fn with_path(e: AppError, path: &Path) -> AppError {
    match e {
        AppError::Parse(msg) => AppError::Parse(format!("{}: {}", path.display(), msg)),
        other => other,
    }
}

fn parse_int(s: &str) -> Result<i64> {
    s.trim()
        .parse::<i64>()
        .map_err(|e| AppError::Parse(format!("Failed to parse int '{}': {}", s, e)))
}

/// Parse an integer metric field, mapping the -9999 sentinel to None.
fn parse_metric(s: &str) -> Result<Option<f64>> {
    let val = parse_int(s)?;
    if val == MISSING_VALUE {
        Ok(None)
    } else {
        Ok(Some(val as f64))
    }
}

/// Parse an 8-digit YYYYMMDD token into a calendar date.
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    let s = s.trim();
    if s.len() != 8 {
        return Err(AppError::Parse(format!(
            "Expected 8-digit YYYYMMDD date, got '{}'",
            s
        )));
    }

    NaiveDate::parse_from_str(s, "%Y%m%d")
        .map_err(|e| AppError::Parse(format!("Invalid date '{}': {}", s, e)))
}
