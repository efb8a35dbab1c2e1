//! Declarative template processing.
//!
//! A template is raw YAML text with `${NAME}` placeholders. Processing
//! merges the variable layers (file-bound defaults win over caller
//! variables, which win over the template's own `parameters:` defaults),
//! expands the placeholders, unwraps `Template`/`List` roots and sorts
//! the resulting objects into Kind apply order.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use provost_core::object::{self, Object};
use provost_core::{ProvostError, ProvostResult};
use regex::Regex;
use serde_yaml::Value;

pub const VAR_USER_NAME: &str = "USER_NAME";
pub const VAR_PROJECT_USER: &str = "PROJECT_USER";
pub const VAR_PROJECT_REQUESTING_USER: &str = "PROJECT_REQUESTING_USER";
pub const VAR_PROJECT_ADMIN_USER: &str = "PROJECT_ADMIN_USER";
pub const VAR_COMMIT: &str = "COMMIT";
pub const VAR_COMMIT_QUOTAS: &str = "COMMIT_QUOTAS";
pub const VAR_DEPLOY_TYPE: &str = "DEPLOY_TYPE";

static VARIABLE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Z_0-9]+)\}").unwrap());

/// One template file together with its bound parameter defaults and the
/// version it was published as.
#[derive(Debug, Clone)]
pub struct Template {
    pub filename: String,
    pub default_params: BTreeMap<String, String>,
    pub content: String,
    pub version: String,
}

impl Template {
    pub fn new(
        filename: impl Into<String>,
        default_params: BTreeMap<String, String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            filename: filename.into(),
            default_params,
            content: String::new(),
            version: version.into(),
        }
    }

    /// Expands the template against `vars` and returns its objects in
    /// Kind apply order.
    pub fn process(&self, vars: &BTreeMap<String, String>) -> ProvostResult<Vec<Object>> {
        let mut template_vars = merge(vars, &self.default_params);
        if let Some(params) = self.params_from_template()? {
            template_vars = merge(&params, &template_vars);
        }
        let expanded = self.replace_vars(&template_vars);
        let mut objects = parse_objects(&expanded)?;
        object::sort_by_kind(&mut objects);
        Ok(objects)
    }

    /// Replaces every bound `${NAME}` placeholder; unbound placeholders
    /// are left verbatim.
    pub fn replace_vars(&self, vars: &BTreeMap<String, String>) -> String {
        VARIABLE_REGEX
            .replace_all(&self.content, |captures: &regex::Captures<'_>| {
                let name = &captures[1];
                vars.get(name)
                    .cloned()
                    .unwrap_or_else(|| captures[0].to_string())
            })
            .into_owned()
    }

    /// Defaults declared in the template's own `parameters:` section as
    /// `{name, value}` pairs.
    fn params_from_template(&self) -> ProvostResult<Option<BTreeMap<String, String>>> {
        let root: Object = serde_yaml::from_str(&self.content)
            .map_err(|e| parse_error(&self.filename, e))?;
        let Some(params) = root.get("parameters").and_then(Value::as_sequence) else {
            return Ok(None);
        };
        let mut defaults = BTreeMap::new();
        for param in params {
            let (Some(name), Some(value)) = (
                param.get("name").and_then(Value::as_str),
                param.get("value").map(value_to_string),
            ) else {
                continue;
            };
            defaults.insert(name.to_string(), value);
        }
        Ok(Some(defaults))
    }
}

/// Builds the variables every template processing starts from.
pub fn collect_vars(
    os_username: &str,
    ns_base_name: &str,
    master_user: &str,
) -> BTreeMap<String, String> {
    BTreeMap::from([
        (VAR_USER_NAME.to_string(), ns_base_name.to_string()),
        (VAR_PROJECT_USER.to_string(), os_username.to_string()),
        (
            VAR_PROJECT_REQUESTING_USER.to_string(),
            os_username.to_string(),
        ),
        (VAR_PROJECT_ADMIN_USER.to_string(), master_user.to_string()),
    ])
}

/// Unwraps a processed template: `Template` roots yield `.objects[]`,
/// `List` roots `.items[]`, anything else is a single object.
pub fn parse_objects(source: &str) -> ProvostResult<Vec<Object>> {
    let root: Object =
        serde_yaml::from_str(source).map_err(|e| parse_error("template", e))?;

    let items = match object::get_kind(&root) {
        object::KIND_TEMPLATE => root.get("objects").and_then(Value::as_sequence).cloned(),
        object::KIND_LIST => root.get("items").and_then(Value::as_sequence).cloned(),
        _ => return Ok(vec![root]),
    };

    let Some(items) = items else {
        return Ok(Vec::new());
    };
    items
        .into_iter()
        .map(|item| {
            item.as_mapping().cloned().ok_or_else(|| {
                ProvostError::validation("template object is not a mapping")
            })
        })
        .collect()
}

/// `second` wins over `target` on key collisions.
fn merge(
    target: &BTreeMap<String, String>,
    second: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut result = second.clone();
    for (key, value) in target {
        result.entry(key.clone()).or_insert_with(|| value.clone());
    }
    result
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

fn parse_error(source: &str, err: serde_yaml::Error) -> ProvostError {
    ProvostError::validation(format!("parsing template '{source}' failed: {err}"))
}
