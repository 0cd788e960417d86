use std::collections::BTreeMap;

use anyhow::{Context, Result, anyhow, bail};
use hrsync_core::{CellValue, Record, RecordStore, keys_match, normalize_key};
use reqwest::blocking::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};
use url::Url;

const USER_AGENT: &str = "hrsync-connectors";

#[derive(Debug, Deserialize)]
struct SheetsConnection {
    spreadsheet_id: String,
    #[serde(default)]
    sheet_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetMeta>,
}

#[derive(Debug, Deserialize)]
struct SheetMeta {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    sheet_id: i64,
    title: String,
    #[serde(default)]
    grid_properties: GridProperties,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GridProperties {
    #[serde(default)]
    column_count: usize,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Clone)]
struct Worksheet {
    spreadsheet_id: String,
    sheet_id: i64,
    title: String,
    column_count: usize,
}

impl Worksheet {
    fn a1(&self, range: &str) -> String {
        let plain = self
            .title
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if plain {
            format!("{}!{range}", self.title)
        } else {
            format!("'{}'!{range}", self.title.replace('\'', "''"))
        }
    }
}

/// Record store backed by one worksheet of a Google spreadsheet (Sheets REST v4).
pub struct GoogleSheetsStore {
    client: Client,
    base_url: String,
    token: String,
    sheet: Option<Worksheet>,
    headers: Option<Vec<String>>,
}

impl GoogleSheetsStore {
    pub fn new(base_url: &str, token: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            sheet: None,
            headers: None,
        }
    }

    fn sheet(&self) -> Result<&Worksheet> {
        self.sheet
            .as_ref()
            .ok_or_else(|| anyhow!("not connected to any worksheet"))
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .with_context(|| format!("invalid sheets base url {}", self.base_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("sheets base url cannot carry a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("Authorization", format!("Bearer {}", self.token))
            .header("User-Agent", USER_AGENT)
    }

    fn read_range(&self, range: &str) -> Result<Vec<Vec<Value>>> {
        let sheet = self.sheet()?;
        let mut url = self.endpoint(&["spreadsheets", sheet.spreadsheet_id.as_str(), "values", range])?;
        url.query_pairs_mut()
            .append_pair("valueRenderOption", "UNFORMATTED_VALUE")
            .append_pair("majorDimension", "ROWS");
        let response = self
            .authorized(self.client.get(url))
            .send()
            .with_context(|| format!("sheets read {range} failed"))?;
        let body: ValueRange = response
            .error_for_status()
            .with_context(|| format!("sheets read {range} rejected"))?
            .json()
            .with_context(|| "invalid sheets value range")?;
        Ok(body.values)
    }

    fn read_all(&self) -> Result<Vec<Vec<Value>>> {
        let sheet = self.sheet()?;
        let range = sheet.a1("A:ZZZ");
        self.read_range(&range)
    }

    fn write_cells(&self, cells: Vec<(String, Value)>) -> Result<()> {
        if cells.is_empty() {
            return Ok(());
        }
        let sheet = self.sheet()?;
        let data: Vec<Value> = cells
            .into_iter()
            .map(|(range, value)| json!({"range": sheet.a1(&range), "values": [[value]]}))
            .collect();
        let count = data.len();
        let url = self.endpoint(&[
            "spreadsheets",
            sheet.spreadsheet_id.as_str(),
            "values:batchUpdate",
        ])?;
        self.authorized(self.client.post(url))
            .json(&json!({"valueInputOption": "USER_ENTERED", "data": data}))
            .send()
            .with_context(|| "sheets values:batchUpdate failed")?
            .error_for_status()
            .with_context(|| "sheets values:batchUpdate rejected")?;
        debug!(cells = count, sheet = %sheet.title, "sheet cells written");
        Ok(())
    }

    fn append_column(&mut self) -> Result<()> {
        let sheet = self.sheet()?.clone();
        let target = format!("{}:batchUpdate", sheet.spreadsheet_id);
        let url = self.endpoint(&["spreadsheets", target.as_str()])?;
        self.authorized(self.client.post(url))
            .json(&json!({
                "requests": [{
                    "appendDimension": {
                        "sheetId": sheet.sheet_id,
                        "dimension": "COLUMNS",
                        "length": 1
                    }
                }]
            }))
            .send()
            .with_context(|| "sheets appendDimension failed")?
            .error_for_status()
            .with_context(|| "sheets appendDimension rejected")?;
        if let Some(sheet) = self.sheet.as_mut() {
            sheet.column_count += 1;
        }
        info!(sheet = %sheet.title, "worksheet grid expanded by one column");
        Ok(())
    }

    fn row_number(rows: &[Vec<Value>], key_idx: usize, key_value: &str) -> Option<usize> {
        rows.iter()
            .skip(1)
            .position(|row| {
                row.get(key_idx)
                    .and_then(CellValue::from_json)
                    .is_some_and(|cell| keys_match(&cell.render(), key_value))
            })
            .map(|idx| idx + 2)
    }
}

impl RecordStore for GoogleSheetsStore {
    fn connect(&mut self, config: &Value) -> Result<()> {
        let connection: SheetsConnection = serde_json::from_value(config.clone())
            .with_context(|| "google_sheets connection needs spreadsheet_id")?;
        let spreadsheet_id = parse_spreadsheet_id(&connection.spreadsheet_id)?;

        let mut url = self.endpoint(&["spreadsheets", spreadsheet_id.as_str()])?;
        url.query_pairs_mut()
            .append_pair("fields", "sheets.properties");
        let meta: SpreadsheetMeta = self
            .authorized(self.client.get(url))
            .send()
            .with_context(|| format!("sheets metadata request for {spreadsheet_id} failed"))?
            .error_for_status()
            .with_context(|| format!("spreadsheet {spreadsheet_id} is not accessible"))?
            .json()
            .with_context(|| "invalid spreadsheet metadata")?;

        let wanted = connection.sheet_name.as_deref().map(str::trim);
        let properties = meta
            .sheets
            .into_iter()
            .map(|sheet| sheet.properties)
            .find(|props| wanted.is_none_or(|name| props.title == name))
            .ok_or_else(|| match wanted {
                Some(name) => anyhow!("worksheet '{name}' not found in {spreadsheet_id}"),
                None => anyhow!("spreadsheet {spreadsheet_id} has no worksheets"),
            })?;

        info!(spreadsheet_id = %spreadsheet_id, sheet = %properties.title, "connected to google sheet");
        self.sheet = Some(Worksheet {
            spreadsheet_id,
            sheet_id: properties.sheet_id,
            title: properties.title,
            column_count: properties.grid_properties.column_count,
        });
        self.headers = None;
        self.refresh_headers()?;
        Ok(())
    }

    fn get_headers(&mut self) -> Result<Vec<String>> {
        match &self.headers {
            Some(headers) => Ok(headers.clone()),
            None => self.refresh_headers(),
        }
    }

    fn refresh_headers(&mut self) -> Result<Vec<String>> {
        let range = self.sheet()?.a1("1:1");
        let rows = self.read_range(&range)?;
        let headers: Vec<String> = rows
            .into_iter()
            .next()
            .unwrap_or_default()
            .iter()
            .map(|cell| {
                CellValue::from_json(cell)
                    .map(|value| value.render())
                    .unwrap_or_default()
            })
            .collect();
        self.headers = Some(headers.clone());
        Ok(headers)
    }

    fn get_all_records(&mut self) -> Result<Vec<Record>> {
        let rows = self.read_all()?;
        let Some((header_row, data)) = rows.split_first() else {
            return Ok(Vec::new());
        };
        let headers: Vec<String> = header_row
            .iter()
            .map(|cell| CellValue::from_json(cell).map(|v| v.render()).unwrap_or_default())
            .collect();
        Ok(data
            .iter()
            .map(|row| {
                headers
                    .iter()
                    .enumerate()
                    .filter(|(_, header)| !header.is_empty())
                    .map(|(idx, header)| {
                        let cell = row
                            .get(idx)
                            .and_then(CellValue::from_json)
                            .unwrap_or_default();
                        (header.clone(), cell)
                    })
                    .collect()
            })
            .collect())
    }

    fn update_record(
        &mut self,
        key_column: &str,
        key_value: &str,
        updates: &BTreeMap<String, CellValue>,
    ) -> Result<bool> {
        let mut headers = self.get_headers()?;
        let key_idx = headers
            .iter()
            .position(|header| header == key_column)
            .ok_or_else(|| anyhow!("key column '{key_column}' not found in headers"))?;
        let rows = self.read_all()?;
        let Some(row) = Self::row_number(&rows, key_idx, key_value) else {
            return Ok(false);
        };

        for column in updates.keys() {
            if !headers.contains(column) {
                self.add_column(column, None)?;
                headers = self.get_headers()?;
            }
        }

        let cells = updates
            .iter()
            .filter_map(|(column, value)| {
                let idx = headers.iter().position(|header| header == column)?;
                Some((format!("{}{row}", column_letter(idx + 1)), value.to_json()))
            })
            .collect();
        self.write_cells(cells)?;
        Ok(true)
    }

    fn add_column(&mut self, name: &str, default_values: Option<&[CellValue]>) -> Result<bool> {
        if name.trim().is_empty() {
            bail!("column name cannot be empty");
        }
        let headers = self.get_headers()?;
        if headers.iter().any(|header| header == name) {
            return Ok(true);
        }
        let position = headers.len() + 1;
        if position > self.sheet()?.column_count {
            self.append_column()?;
        }

        let letter = column_letter(position);
        let mut cells = vec![(format!("{letter}1"), Value::String(name.to_string()))];
        for (offset, value) in default_values.unwrap_or_default().iter().enumerate() {
            cells.push((format!("{letter}{}", offset + 2), value.to_json()));
        }
        self.write_cells(cells)?;
        info!(column = name, "sheet column created");
        self.refresh_headers()?;
        Ok(true)
    }

    fn update_column_values(
        &mut self,
        column: &str,
        key_column: &str,
        values: &BTreeMap<String, CellValue>,
    ) -> Result<bool> {
        let headers = self.get_headers()?;
        let col_idx = headers
            .iter()
            .position(|header| header == column)
            .ok_or_else(|| anyhow!("column '{column}' not found"))?;
        let key_idx = headers
            .iter()
            .position(|header| header == key_column)
            .ok_or_else(|| anyhow!("key column '{key_column}' not found"))?;
        let by_key: BTreeMap<String, &CellValue> = values
            .iter()
            .map(|(key, value)| (normalize_key(key), value))
            .collect();

        let rows = self.read_all()?;
        let letter = column_letter(col_idx + 1);
        let cells = rows
            .iter()
            .enumerate()
            .skip(1)
            .filter_map(|(idx, row)| {
                let key = row
                    .get(key_idx)
                    .and_then(CellValue::from_json)
                    .map(|cell| cell.render())?;
                let value = by_key.get(&normalize_key(&key))?;
                Some((format!("{letter}{}", idx + 1), value.to_json()))
            })
            .collect();
        self.write_cells(cells)?;
        Ok(true)
    }

    fn get_column_values(&mut self, column: &str) -> Result<Vec<CellValue>> {
        let headers = self.get_headers()?;
        let col_idx = headers
            .iter()
            .position(|header| header == column)
            .ok_or_else(|| anyhow!("column '{column}' not found"))?;
        let rows = self.read_all()?;
        Ok(rows
            .iter()
            .skip(1)
            .map(|row| {
                row.get(col_idx)
                    .and_then(CellValue::from_json)
                    .unwrap_or_default()
            })
            .collect())
    }
}

/// Accepts a bare spreadsheet id or any URL containing `/spreadsheets/d/<id>`.
pub fn parse_spreadsheet_id(raw: &str) -> Result<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        bail!("spreadsheet_id (or a link) is required");
    }
    if let Ok(url) = Url::parse(raw) {
        let segments: Vec<&str> = url
            .path_segments()
            .map(|segments| segments.collect())
            .unwrap_or_default();
        return segments
            .windows(3)
            .find(|window| window[0] == "spreadsheets" && window[1] == "d" && !window[2].is_empty())
            .map(|window| window[2].to_string())
            .ok_or_else(|| anyhow!("no spreadsheet id in {raw}"));
    }
    if raw.contains('/') {
        bail!("no spreadsheet id in {raw}");
    }
    Ok(raw.to_string())
}

/// 1-based column index to A1 letters (1 → A, 27 → AA).
pub fn column_letter(mut index: usize) -> String {
    let mut letters = Vec::new();
    while index > 0 {
        let rem = (index - 1) % 26;
        letters.push(char::from(b'A' + rem as u8));
        index = (index - 1) / 26;
    }
    letters.iter().rev().collect()
}
