//! 字段目录与文档类型分类
//!
//! 字段目录是整个流水线的规范顺序：提示词、合并、最终结果都按这里的顺序排列。

use once_cell::sync::Lazy;
use regex::Regex;

use super::field::{FieldCategory, FieldDefinition};

/// 文档类型分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentType {
    PhysicianReferral,
    FaceToFaceEncounter,
    InsuranceAuthorization,
    ClinicalNotes,
    PrescriptionOrders,
    LaboratoryResults,
    OtherMedical,
}

impl DocumentType {
    pub const ALL: [DocumentType; 7] = [
        DocumentType::PhysicianReferral,
        DocumentType::FaceToFaceEncounter,
        DocumentType::InsuranceAuthorization,
        DocumentType::ClinicalNotes,
        DocumentType::PrescriptionOrders,
        DocumentType::LaboratoryResults,
        DocumentType::OtherMedical,
    ];

    /// 提示词中使用的标识
    pub fn code(self) -> &'static str {
        match self {
            DocumentType::PhysicianReferral => "PHYSICIAN_REFERRAL",
            DocumentType::FaceToFaceEncounter => "FACE_TO_FACE_ENCOUNTER",
            DocumentType::InsuranceAuthorization => "INSURANCE_AUTHORIZATION",
            DocumentType::ClinicalNotes => "CLINICAL_NOTES",
            DocumentType::PrescriptionOrders => "PRESCRIPTION_ORDERS",
            DocumentType::LaboratoryResults => "LABORATORY_RESULTS",
            DocumentType::OtherMedical => "OTHER_MEDICAL",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            DocumentType::PhysicianReferral => {
                "Physician Referrals (including specialist referrals and discharge summaries)"
            }
            DocumentType::FaceToFaceEncounter => {
                "Face-to-Face Encounter Documentation (CMS-485, physician certifications)"
            }
            DocumentType::InsuranceAuthorization => {
                "Insurance Authorizations (prior auth, benefit verification)"
            }
            DocumentType::ClinicalNotes => {
                "Clinical Notes and Assessments (nursing notes, therapy evaluations)"
            }
            DocumentType::PrescriptionOrders => {
                "Prescription Orders (medication lists, drug therapy plans)"
            }
            DocumentType::LaboratoryResults => "Laboratory Results (blood work, diagnostic tests)",
            DocumentType::OtherMedical => {
                "Other Medical Documentation (flag for manual review if confidence <90%)"
            }
        }
    }
}

// ========== 格式规则 ==========

/// 正则类格式规则
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldPattern {
    /// MM/DD/YYYY 或 YYYY-MM-DD
    UsOrIsoDate,
    /// MM/DD/YYYY
    UsDate,
    Ssn,
    Phone,
    Npi,
    BloodPressure,
    HeartRate,
    Temperature,
    OxygenSaturation,
}

static US_OR_ISO_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(0[1-9]|1[0-2])/(0[1-9]|[12][0-9]|3[01])/[0-9]{4}$|^[0-9]{4}-[0-9]{2}-[0-9]{2}$")
        .unwrap()
});
static US_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(0[1-9]|1[0-2])/(0[1-9]|[12][0-9]|3[01])/[0-9]{4}$").unwrap());
static SSN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]{3}-[0-9]{2}-[0-9]{4}$|^[0-9]{9}$").unwrap());
static PHONE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\(?[0-9]{3}\)?[-.\s]?[0-9]{3}[-.\s]?[0-9]{4}$").unwrap());
static NPI: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{10}$").unwrap());
static BLOOD_PRESSURE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]{2,3}/[0-9]{2,3}$").unwrap());
static HEART_RATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{2,3}$").unwrap());
static TEMPERATURE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{2,3}\.[0-9]$").unwrap());
static OXYGEN_SATURATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{2,3}%$").unwrap());

impl FieldPattern {
    pub fn regex(self) -> &'static Regex {
        match self {
            FieldPattern::UsOrIsoDate => &US_OR_ISO_DATE,
            FieldPattern::UsDate => &US_DATE,
            FieldPattern::Ssn => &SSN,
            FieldPattern::Phone => &PHONE,
            FieldPattern::Npi => &NPI,
            FieldPattern::BloodPressure => &BLOOD_PRESSURE,
            FieldPattern::HeartRate => &HEART_RATE,
            FieldPattern::Temperature => &TEMPERATURE,
            FieldPattern::OxygenSaturation => &OXYGEN_SATURATION,
        }
    }

    /// 出现在校验错误信息中的格式名
    pub fn name(self) -> &'static str {
        match self {
            FieldPattern::UsOrIsoDate => "MM/DD/YYYY or YYYY-MM-DD",
            FieldPattern::UsDate => "MM/DD/YYYY",
            FieldPattern::Ssn => "SSN format",
            FieldPattern::Phone => "phone number format",
            FieldPattern::Npi => "10-digit NPI",
            FieldPattern::BloodPressure => "blood pressure format (e.g., 120/80)",
            FieldPattern::HeartRate => "bpm",
            FieldPattern::Temperature => "temperature format (e.g., 98.6)",
            FieldPattern::OxygenSaturation => "O2 saturation (e.g., 98%)",
        }
    }
}

/// 字段的格式规则
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatRule {
    /// 必须匹配的正则
    Pattern(FieldPattern),
    /// 仅字母和数字
    AlphaNumeric,
    /// 取值必须在给定集合内
    OneOf(&'static [&'static str]),
    /// 非空即可
    Required,
}

impl FormatRule {
    /// 值是否满足规则；空白值对所有规则都不满足
    ///
    /// 按原值匹配，不做 trim：首尾带空白的值与存储的值一致地判为不合格。
    pub fn accepts(&self, value: &str) -> bool {
        if value.trim().is_empty() {
            return false;
        }
        match self {
            FormatRule::Pattern(pattern) => pattern.regex().is_match(value),
            FormatRule::AlphaNumeric => value.chars().all(|c| c.is_ascii_alphanumeric()),
            FormatRule::OneOf(options) => options.contains(&value),
            FormatRule::Required => true,
        }
    }

    pub fn name(&self) -> String {
        match self {
            FormatRule::Pattern(pattern) => pattern.name().to_string(),
            FormatRule::AlphaNumeric => "alphanumeric format".to_string(),
            FormatRule::OneOf(options) => format!("allowed values ({})", options.join(", ")),
            FormatRule::Required => "required non-empty value".to_string(),
        }
    }
}

const GENDERS: &[&str] = &["M", "F", "Other", "Male", "Female"];

/// 字段名 → 格式规则；未登记的字段按自由文本处理
static FIELD_RULES: phf::Map<&'static str, FormatRule> = phf::phf_map! {
    "Full Name" => FormatRule::Required,
    "Date of Birth" => FormatRule::Pattern(FieldPattern::UsOrIsoDate),
    "Medical Record Number" => FormatRule::AlphaNumeric,
    "Social Security Number" => FormatRule::Pattern(FieldPattern::Ssn),
    "Address" => FormatRule::Required,
    "Primary Phone" => FormatRule::Pattern(FieldPattern::Phone),
    "Emergency Phone" => FormatRule::Pattern(FieldPattern::Phone),
    "Gender" => FormatRule::OneOf(GENDERS),
    "NPI Number" => FormatRule::Pattern(FieldPattern::Npi),
    "Provider Phone" => FormatRule::Pattern(FieldPattern::Phone),
    "Provider Fax" => FormatRule::Pattern(FieldPattern::Phone),
    "Policy/Member ID" => FormatRule::AlphaNumeric,
    "Group Number" => FormatRule::AlphaNumeric,
    "Authorization Number" => FormatRule::AlphaNumeric,
    "Coverage Effective Date" => FormatRule::Pattern(FieldPattern::UsDate),
    "Coverage End Date" => FormatRule::Pattern(FieldPattern::UsDate),
    "Blood Pressure" => FormatRule::Pattern(FieldPattern::BloodPressure),
    "Heart Rate" => FormatRule::Pattern(FieldPattern::HeartRate),
    "Temperature" => FormatRule::Pattern(FieldPattern::Temperature),
    "Oxygen Saturation" => FormatRule::Pattern(FieldPattern::OxygenSaturation),
    "Admission Date" => FormatRule::Pattern(FieldPattern::UsDate),
    "Discharge Date" => FormatRule::Pattern(FieldPattern::UsDate),
    "Date of Service" => FormatRule::Pattern(FieldPattern::UsDate),
    "Order Date" => FormatRule::Pattern(FieldPattern::UsDate),
    "Authorization Start Date" => FormatRule::Pattern(FieldPattern::UsDate),
    "Authorization End Date" => FormatRule::Pattern(FieldPattern::UsDate),
    "Face to Face Date" => FormatRule::Pattern(FieldPattern::UsDate),
};

// ========== 字段定义 ==========

const fn def(
    name: &'static str,
    tip: &'static str,
    expected_format: &'static str,
    category: FieldCategory,
) -> FieldDefinition {
    FieldDefinition {
        name,
        expected_format,
        tip,
        category,
    }
}

use FieldCategory::{
    ClinicalData as CLI, CriticalDates as DAT, InsuranceDetails as INS,
    PatientDemographics as DEM, ProviderInformation as PRO,
};

static STANDARD_FIELDS: [FieldDefinition; 47] = [
    // 患者基本信息
    def("Full Name", "Last, First, Middle Initial", "LastName, FirstName MiddleInitial", DEM),
    def("Date of Birth", "Patient birth date in various formats", "MM/DD/YYYY or YYYY-MM-DD", DEM),
    def("Medical Record Number", "All variations including MR#, MRN, Patient ID", "Alphanumeric string", DEM),
    def("Social Security Number", "If present, with or without dashes", "XXX-XX-XXXX or XXXXXXXXX", DEM),
    def("Address", "Complete address including street, city, state, zip", "Street, City, State ZIP", DEM),
    def("Primary Phone", "Patient primary contact number", "(XXX) XXX-XXXX or XXX-XXX-XXXX", DEM),
    def("Emergency Phone", "Emergency contact phone number", "(XXX) XXX-XXXX or XXX-XXX-XXXX", DEM),
    def("Gender", "Patient gender designation", "M/F/Other/Male/Female", DEM),
    def("Emergency Contact Name", "Full name of emergency contact person", "FirstName LastName", DEM),
    def("Emergency Contact Relationship", "Relationship to patient", "Spouse/Child/Parent/Sibling/Friend/Other", DEM),
    // 医疗服务提供方
    def("Referring Physician Name", "Full name and credentials of referring doctor", "Dr. FirstName LastName, MD/DO/NP/PA", PRO),
    def("NPI Number", "10-digit National Provider Identifier", "XXXXXXXXXX (10 digits)", PRO),
    def("Practice Name", "Medical practice or facility name", "Practice/Clinic/Hospital Name", PRO),
    def("Provider Phone", "Provider contact phone number", "(XXX) XXX-XXXX", PRO),
    def("Provider Fax", "Provider fax number", "(XXX) XXX-XXXX", PRO),
    def("Provider Address", "Provider practice address", "Street, City, State ZIP", PRO),
    def("Ordering Physician", "If different from referring physician", "Dr. FirstName LastName, Credentials", PRO),
    def("Primary Care Physician", "Patient's primary care provider if mentioned", "Dr. FirstName LastName, Credentials", PRO),
    // 保险
    def("Primary Insurance Name", "Primary insurance payer name and type", "Insurance Company Name", INS),
    def("Policy/Member ID", "Insurance identification number", "Alphanumeric string", INS),
    def("Group Number", "Insurance group number if applicable", "Alphanumeric string", INS),
    def("Authorization Number", "Prior authorization reference number", "Alphanumeric string", INS),
    def("Coverage Effective Date", "Insurance coverage start date", "MM/DD/YYYY", INS),
    def("Coverage End Date", "Insurance coverage end date", "MM/DD/YYYY", INS),
    def("Secondary Insurance", "Secondary insurance if present", "Insurance Company Name", INS),
    def("Medicare Number", "Medicare identification if applicable", "XXXX-XXX-XXXX", INS),
    def("Medicaid Number", "Medicaid identification if applicable", "State-specific format", INS),
    // 临床数据
    def("Primary Diagnosis", "Main diagnosis with ICD-10 code and description", "ICD-10 Code: Description", CLI),
    def("Secondary Diagnoses", "Additional conditions and comorbidities", "ICD-10 Code: Description (multiple)", CLI),
    def("Procedures", "Medical procedures with CPT codes", "CPT Code: Description", CLI),
    def("Current Medications", "All current medications with dosages", "Drug name, dosage, frequency, route", CLI),
    def("Blood Pressure", "Most recent blood pressure reading", "XXX/XX mmHg", CLI),
    def("Heart Rate", "Most recent heart rate", "XX bpm", CLI),
    def("Temperature", "Most recent temperature reading", "XX.X°F or XX.X°C", CLI),
    def("Weight", "Patient weight", "XXX lbs or XXX kg", CLI),
    def("Oxygen Saturation", "O2 saturation percentage", "XX% on room air/oxygen", CLI),
    def("Functional Status", "ADL scores, mobility assessments", "Independent/Assisted/Dependent", CLI),
    def("Allergies", "Drug and environmental allergies", "Allergen: Reaction type", CLI),
    def("Medical History", "Relevant past medical history", "Chronological list of conditions", CLI),
    // 关键日期
    def("Admission Date", "Hospital or facility admission date", "MM/DD/YYYY", DAT),
    def("Discharge Date", "Hospital or facility discharge date", "MM/DD/YYYY", DAT),
    def("Date of Service", "When medical care was provided", "MM/DD/YYYY", DAT),
    def("Order Date", "When physician orders were written", "MM/DD/YYYY", DAT),
    def("Authorization Start Date", "Insurance approval start date", "MM/DD/YYYY", DAT),
    def("Authorization End Date", "Insurance approval end date", "MM/DD/YYYY", DAT),
    def("Next Appointment", "Follow-up appointment date and time", "MM/DD/YYYY HH:MM AM/PM", DAT),
    def("Face to Face Date", "Date of face-to-face encounter for home health", "MM/DD/YYYY", DAT),
];

/// 字段目录
///
/// 有序、不可变；子集（例如重试时尚未取到值的字段）仍保持原有顺序。
#[derive(Debug, Clone)]
pub struct FieldCatalog {
    fields: Vec<FieldDefinition>,
}

impl FieldCatalog {
    /// 完整的标准字段目录
    pub fn standard() -> Self {
        Self {
            fields: STANDARD_FIELDS.to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields.iter()
    }

    pub fn get(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// 字段在规范顺序中的位置
    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn by_category(&self, category: FieldCategory) -> impl Iterator<Item = &FieldDefinition> {
        self.fields.iter().filter(move |f| f.category == category)
    }

    /// 按条件筛选出的子目录
    pub fn subset<F>(&self, mut keep: F) -> Self
    where
        F: FnMut(&FieldDefinition) -> bool,
    {
        Self {
            fields: self.fields.iter().copied().filter(|f| keep(f)).collect(),
        }
    }

    /// 字段的格式规则；自由文本字段和目录外字段返回 None
    pub fn rule_for(&self, name: &str) -> Option<&'static FormatRule> {
        FIELD_RULES.get(name)
    }
}

impl Default for FieldCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_catalog_names_unique_and_ordered() {
        let catalog = FieldCatalog::standard();
        let names: HashSet<_> = catalog.iter().map(|f| f.name).collect();
        assert_eq!(names.len(), catalog.len());
        assert_eq!(catalog.position("Full Name"), Some(0));
        assert_eq!(catalog.position("Face to Face Date"), Some(catalog.len() - 1));
    }

    #[test]
    fn test_categories_are_contiguous() {
        let catalog = FieldCatalog::standard();
        let order: Vec<_> = catalog.iter().map(|f| f.category).collect();
        let mut seen = Vec::new();
        for category in order {
            if seen.last() != Some(&category) {
                assert!(!seen.contains(&category), "分类 {:?} 不连续", category);
                seen.push(category);
            }
        }
        assert_eq!(seen, FieldCategory::ALL.to_vec());
    }

    #[test]
    fn test_every_rule_targets_a_catalog_field() {
        let catalog = FieldCatalog::standard();
        for name in FIELD_RULES.keys() {
            assert!(catalog.contains(name), "规则 {} 没有对应字段", name);
        }
    }

    #[test]
    fn test_subset_keeps_order() {
        let catalog = FieldCatalog::standard();
        let dates = catalog.subset(|f| f.category == FieldCategory::CriticalDates);
        assert_eq!(dates.len(), 8);
        assert_eq!(dates.iter().next().unwrap().name, "Admission Date");
    }

    #[test]
    fn test_rules() {
        let catalog = FieldCatalog::standard();
        let dob = catalog.rule_for("Date of Birth").unwrap();
        assert!(dob.accepts("01/31/1980"));
        assert!(dob.accepts("1980-01-31"));
        assert!(!dob.accepts("13/45/2020"));

        let phone = catalog.rule_for("Primary Phone").unwrap();
        assert!(phone.accepts("(555) 123-4567"));
        assert!(phone.accepts("555.123.4567"));
        assert!(!phone.accepts("123-4567"));

        assert!(catalog.rule_for("Gender").unwrap().accepts("Female"));
        assert!(!catalog.rule_for("Gender").unwrap().accepts("female"));
        assert!(catalog.rule_for("Weight").is_none());
    }

    #[test]
    fn test_patterns_only_accept_ascii_digits() {
        let catalog = FieldCatalog::standard();
        assert!(!catalog.rule_for("NPI Number").unwrap().accepts("١٢٣٤٥٦٧٨٩٠"));
        assert!(!catalog.rule_for("Heart Rate").unwrap().accepts("٧٢"));
        assert!(!catalog.rule_for("Date of Birth").unwrap().accepts("٢٠٢٠-٠١-٠١"));
        assert!(catalog.rule_for("NPI Number").unwrap().accepts("1234567890"));
        assert!(catalog.rule_for("Heart Rate").unwrap().accepts("72"));
    }

    #[test]
    fn test_surrounding_whitespace_fails_rule() {
        let catalog = FieldCatalog::standard();
        let npi = catalog.rule_for("NPI Number").unwrap();
        assert!(!npi.accepts(" 1234567890 "));
        assert!(!npi.accepts("   "));
        assert!(!catalog.rule_for("Gender").unwrap().accepts("Female "));
        assert!(!catalog.rule_for("Primary Phone").unwrap().accepts("\t(555) 123-4567"));
    }
}
