pub const REPORT_CONFIG_JSON: &str = include_str!("../templates/report_config.json");
pub const REPORT_TEMPLATE_HTML: &str = include_str!("../templates/report_template.html");
pub const REPORT_CONFIG_FILE: &str = "report_config.json";
pub const REPORT_TEMPLATE_FILE: &str = "report_template.html";
