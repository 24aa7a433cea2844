//! Maintenance form rules.
//!
//! Validation walks the raw JSON so every problem is reported with its
//! field path in one response, then converts to the typed form.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub path: String,
    pub message: String,
}

impl FieldError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcBrand {
    Daikin,
    Carrier,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BtuSize {
    #[serde(rename = "9000")]
    Btu9000,
    #[serde(rename = "12000")]
    Btu12000,
    #[serde(rename = "other")]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingStatus {
    Normal,
    Abnormal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeterType {
    #[serde(rename = "has")]
    Installed,
    #[serde(rename = "none")]
    NoMeter,
    /// Uses the site's own electricity supply
    #[serde(rename = "location")]
    SiteSupply,
    #[serde(rename = "not_requested")]
    NotRequested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BankApproval {
    Approved,
    NotApproved,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkProcedures {
    pub step1: bool,
    pub step2: bool,
    pub step3: bool,
    pub step4: bool,
    pub step5: bool,
    pub step6: bool,
}

/// A validated air-conditioner maintenance inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceForm {
    pub date: String,
    pub time: String,
    pub location: String,
    pub machine_number: String,

    pub ac_brand: AcBrand,
    #[serde(default)]
    pub brand_other_text: Option<String>,
    pub btu: BtuSize,
    #[serde(default)]
    pub btu_other_text: Option<String>,

    pub ac_status: OperatingStatus,
    #[serde(default)]
    pub ac_status_detail: Option<String>,
    pub timer_status: OperatingStatus,
    #[serde(default)]
    pub timer_status_detail: Option<String>,

    pub electric_status: OperatingStatus,
    pub ln_voltage: String,
    pub lg_voltage: String,
    pub gn_voltage: String,
    pub g_ohm: String,

    pub meter: MeterType,
    #[serde(default)]
    pub meter_number: Option<String>,

    #[serde(default)]
    pub repair_details: Option<String>,
    #[serde(default)]
    pub cannot_proceed: Option<String>,

    pub bank_approval: BankApproval,
    #[serde(default)]
    pub not_approved_reason: Option<String>,

    #[serde(default)]
    pub work_procedures: Option<WorkProcedures>,
    pub refrigerant_pressure: String,
    pub refrigerant_added: String,
    #[serde(default)]
    pub repair_work_detail: Option<String>,
    #[serde(default)]
    pub suggestions: Option<String>,

    pub next_month: String,
    pub next_year: String,
}

const REQUIRED_TEXT: &[(&str, &str)] = &[
    ("date", "กรุณาเลือกวันที่"),
    ("time", "กรุณาเลือกเวลา"),
    ("location", "กรุณากรอกชื่อสถานที่"),
    ("ln_voltage", "กรุณากรอกค่า L+N"),
    ("lg_voltage", "กรุณากรอกค่า L+G"),
    ("gn_voltage", "กรุณากรอกค่า G+N"),
    ("g_ohm", "กรุณากรอกค่า G"),
    ("refrigerant_pressure", "กรุณากรอกแรงดันน้ำยาแอร์"),
    ("refrigerant_added", "กรุณากรอกปริมาณน้ำยาที่เติม"),
    ("next_month", "กรุณากรอกเดือนที่เข้าล้างครั้งต่อไป"),
    ("next_year", "กรุณากรอกปีที่เข้าล้างครั้งต่อไป"),
];

const OPTIONAL_TEXT: &[&str] = &[
    "brand_other_text",
    "btu_other_text",
    "ac_status_detail",
    "timer_status_detail",
    "meter_number",
    "repair_details",
    "cannot_proceed",
    "not_approved_reason",
    "repair_work_detail",
    "suggestions",
];

const CHOICES: &[(&str, &[&str], &str)] = &[
    ("ac_brand", &["daikin", "carrier", "other"], "กรุณาเลือกยี่ห้อเครื่องปรับอากาศ"),
    ("btu", &["9000", "12000", "other"], "กรุณาเลือกขนาด BTU"),
    ("ac_status", &["normal", "abnormal"], "กรุณาเลือกสถานะการทำงานของแอร์"),
    ("timer_status", &["normal", "abnormal"], "กรุณาเลือกสถานะการทำงานของ TIMER"),
    ("electric_status", &["normal", "abnormal"], "กรุณาเลือกสถานะระบบไฟฟ้า"),
    (
        "meter",
        &["has", "none", "location", "not_requested"],
        "กรุณาเลือกประเภทมิเตอร์ไฟฟ้า",
    ),
    ("bank_approval", &["approved", "not_approved"], "กรุณาเลือกความเห็นของธนาคาร"),
];

/// `(field, value, detail field, message)`: when `field == value` the detail
/// field must be non-empty.
const CONDITIONAL_DETAILS: &[(&str, &str, &str, &str)] = &[
    ("ac_brand", "other", "brand_other_text", "กรุณาระบุยี่ห้อเครื่องปรับอากาศ"),
    ("btu", "other", "btu_other_text", "กรุณาระบุขนาด BTU"),
    ("ac_status", "abnormal", "ac_status_detail", "กรุณาระบุรายละเอียดความผิดปกติ"),
    ("timer_status", "abnormal", "timer_status_detail", "กรุณาระบุรายละเอียดความผิดปกติ"),
    ("meter", "has", "meter_number", "กรุณาระบุหมายเลขมิเตอร์"),
    ("bank_approval", "not_approved", "not_approved_reason", "กรุณาระบุเหตุผลที่ไม่อนุมัติ"),
];

const WORK_STEPS: &[&str] = &["step1", "step2", "step3", "step4", "step5", "step6"];

const EXPECTED_STRING: &str = "Expected string";

/// Check `payload` against the form rules.
pub fn validate_form(payload: &Value) -> Result<MaintenanceForm, Vec<FieldError>> {
    let Some(fields) = payload.as_object() else {
        return Err(vec![FieldError::new("", "Expected object")]);
    };

    let mut errors = Vec::new();
    for (name, message) in REQUIRED_TEXT {
        check_required_text(fields, name, message, &mut errors);
    }
    check_machine_number(fields, &mut errors);
    for (name, allowed, message) in CHOICES {
        match fields.get(*name).and_then(Value::as_str) {
            Some(value) if allowed.contains(&value) => {}
            _ => errors.push(FieldError::new(*name, *message)),
        }
    }
    for name in OPTIONAL_TEXT {
        if let Some(value) = fields.get(*name) {
            if !value.is_null() && !value.is_string() {
                errors.push(FieldError::new(*name, EXPECTED_STRING));
            }
        }
    }
    check_work_procedures(fields, &mut errors);
    for (field, trigger, detail, message) in CONDITIONAL_DETAILS {
        let triggered = fields.get(*field).and_then(Value::as_str) == Some(*trigger);
        if triggered && text(fields, detail).is_none() {
            errors.push(FieldError::new(*detail, *message));
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }
    serde_json::from_value(Value::Object(fields.clone()))
        .map_err(|error| vec![FieldError::new("", error.to_string())])
}

fn text<'a>(fields: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    fields
        .get(name)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
}

fn check_required_text(
    fields: &Map<String, Value>,
    name: &str,
    message: &str,
    errors: &mut Vec<FieldError>,
) {
    match fields.get(name) {
        Some(Value::String(value)) if !value.is_empty() => {}
        Some(Value::String(_)) | None | Some(Value::Null) => {
            errors.push(FieldError::new(name, message));
        }
        Some(_) => errors.push(FieldError::new(name, EXPECTED_STRING)),
    }
}

fn check_machine_number(fields: &Map<String, Value>, errors: &mut Vec<FieldError>) {
    const FIELD: &str = "machine_number";
    match fields.get(FIELD) {
        Some(Value::String(value)) => {
            if value.chars().count() != 4 {
                errors.push(FieldError::new(FIELD, "หมายเลขเครื่องต้องเป็น 4 หลัก"));
            } else if !value.chars().all(|ch| ch.is_ascii_digit()) {
                errors.push(FieldError::new(FIELD, "กรุณากรอกตัวเลข 4 หลัก"));
            }
        }
        None | Some(Value::Null) => {
            errors.push(FieldError::new(FIELD, "หมายเลขเครื่องต้องเป็น 4 หลัก"));
        }
        Some(_) => errors.push(FieldError::new(FIELD, EXPECTED_STRING)),
    }
}

fn check_work_procedures(fields: &Map<String, Value>, errors: &mut Vec<FieldError>) {
    match fields.get("work_procedures") {
        None | Some(Value::Null) => {}
        Some(Value::Object(steps)) => {
            for step in WORK_STEPS {
                if !steps.get(*step).is_some_and(Value::is_boolean) {
                    errors.push(FieldError::new(
                        format!("work_procedures.{step}"),
                        "Expected boolean",
                    ));
                }
            }
        }
        Some(_) => errors.push(FieldError::new("work_procedures", "Expected object")),
    }
}
