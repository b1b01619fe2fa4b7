//! The library of ready-made report templates.

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{config::Config, value, Error};

const BUILTIN_TEMPLATES: &str = include_str!("../templates/builtin.yaml");

/// The name of the pseudo-category that matches every template.
pub const ALL_CATEGORIES: &str = "All";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateQuery {
    pub id: String,
    /// 1-based slot position.
    pub index: usize,
    #[serde(default)]
    pub description: String,
    pub soql: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Processor {
    #[serde(default)]
    pub description: String,
    pub javascript: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub name: String,
    pub category: String,
    #[serde(default)]
    pub complexity: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub features: Vec<String>,
    pub query_count: usize,
    pub queries: Vec<TemplateQuery>,
    pub processor: Processor,
}

impl Template {
    /// Templates that fit in two query slots are available in trial mode.
    pub fn is_trial_compatible(&self) -> bool {
        self.query_count <= 2
    }

    /// Case-insensitive match of the search term against name, description,
    /// category and features.
    pub fn matches(&self, search: &str) -> bool {
        let needle = search.to_lowercase();
        let hit = |s: &str| s.to_lowercase().contains(&needle);
        hit(&self.name)
            || hit(&self.description)
            || hit(&self.category)
            || self.features.iter().any(|f| hit(f))
    }

    fn check(&self) -> Result<(), Error> {
        let malformed = |reason: String| Err(Error::MalformedTemplate(self.id.clone(), reason));
        if self.query_count != 2 && self.query_count != 4 {
            return malformed(format!("query_count must be 2 or 4, got {}", self.query_count));
        }
        if self.queries.len() != self.query_count {
            return malformed(format!(
                "declares {} queries but defines {}",
                self.query_count,
                self.queries.len()
            ));
        }
        if self.processor.javascript.trim().is_empty() {
            return malformed("processor script is empty".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct TemplateFile {
    templates: Vec<Template>,
}

/// A category filter entry, including the leading "All" entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryInfo {
    pub name: String,
    pub label: String,
    pub count: usize,
}

#[derive(Debug, Clone)]
pub struct TemplateLibrary {
    templates: Vec<Template>,
    trial_mode: bool,
}

impl TemplateLibrary {
    /// The built-in catalogue, restricted according to the configured mode.
    pub fn builtin(config: &Config) -> Result<Self, Error> {
        let mut lib = Self {
            templates: Vec::new(),
            trial_mode: config.trial_mode,
        };
        lib.add_yaml(BUILTIN_TEMPLATES)?;
        Ok(lib)
    }

    /// Parse and add every template in the given YAML document. Returns how
    /// many templates were added.
    pub fn add_yaml(&mut self, content: &str) -> Result<usize, Error> {
        let file: TemplateFile = serde_yaml::from_str(content)?;
        self.add_all(file.templates)
    }

    /// Load additional templates from every JSON or YAML file matching the
    /// given glob pattern.
    pub fn load_files(&mut self, pattern: &str) -> Result<usize, Error> {
        let paths = glob::glob(pattern)
            .map_err(|e| Error::TemplateFilePattern(pattern.to_string(), e))?;
        let mut added = 0;
        for path in paths {
            let path = path?;
            let file: TemplateFile = serde_json::from_value(value::load_from_file(&path)?)?;
            debug!("Loading templates from {}", path.display());
            added += self.add_all(file.templates)?;
        }
        Ok(added)
    }

    fn add_all(&mut self, templates: Vec<Template>) -> Result<usize, Error> {
        let mut added = 0;
        for template in templates {
            template.check()?;
            if let Some(existing) = self.templates.iter_mut().find(|t| t.id == template.id) {
                warn!("Template {} redefined; keeping the latest definition", template.id);
                *existing = template;
            } else {
                self.templates.push(template);
            }
            added += 1;
        }
        Ok(added)
    }

    pub fn is_trial_mode(&self) -> bool {
        self.trial_mode
    }

    pub fn mode_label(&self) -> &'static str {
        if self.trial_mode {
            "Trial Mode"
        } else {
            "Full Mode"
        }
    }

    /// Every template available in the current mode, in catalogue order.
    pub fn available(&self) -> Vec<&Template> {
        self.templates
            .iter()
            .filter(|t| !self.trial_mode || t.is_trial_compatible())
            .collect()
    }

    pub fn get(&self, id: &str) -> Result<&Template, Error> {
        self.available()
            .into_iter()
            .find(|t| t.id == id)
            .ok_or_else(|| Error::NoSuchTemplate(id.to_string()))
    }

    pub fn by_category(&self, category: &str) -> Vec<&Template> {
        self.available()
            .into_iter()
            .filter(|t| t.category == category)
            .collect()
    }

    /// "All" first, then each category in order of first appearance.
    pub fn categories(&self) -> Vec<CategoryInfo> {
        let available = self.available();
        let mut categories = vec![CategoryInfo {
            name: ALL_CATEGORIES.to_string(),
            label: "All Templates".to_string(),
            count: available.len(),
        }];
        for t in &available {
            if categories[1..].iter().all(|c| c.name != t.category) {
                categories.push(CategoryInfo {
                    name: t.category.clone(),
                    label: t.category.clone(),
                    count: available.iter().filter(|o| o.category == t.category).count(),
                });
            }
        }
        categories
    }

    /// Filter by category (or "All") and an optional search term.
    pub fn filter(&self, category: &str, search: &str) -> Vec<&Template> {
        let search = search.trim();
        self.available()
            .into_iter()
            .filter(|t| category == ALL_CATEGORIES || t.category == category)
            .filter(|t| search.is_empty() || t.matches(search))
            .collect()
    }

    pub fn count_text(&self, filtered: usize) -> String {
        format!("{} of {} templates", filtered, self.available().len())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::SlotCount;
    use crate::validate::QueryValidator;

    #[test]
    fn builtin_catalogue_loads() {
        let lib = TemplateLibrary::builtin(&Config::default()).unwrap();
        assert_eq!(lib.available().len(), 4);
        assert_eq!(lib.mode_label(), "Full Mode");
        let t = lib.get("basic_sales_analysis").unwrap();
        assert_eq!(t.queries.len(), 2);
        assert!(t.queries[0].soql.starts_with("SELECT Id, Name"));
        assert!(matches!(lib.get("nope"), Err(Error::NoSuchTemplate(_))));
    }

    #[test]
    fn builtin_scripts_pass_validation() {
        let lib = TemplateLibrary::builtin(&Config::default()).unwrap();
        for t in lib.available() {
            let slots = SlotCount::try_from(t.query_count).unwrap();
            let validator = QueryValidator::new(&Config::default().with_slot_count(slots));
            let result = validator.validate_script(&t.processor.javascript);
            assert!(result.is_valid, "{}: {:?}", t.id, result.errors);
            for q in &t.queries {
                assert!(validator.validate_query(&q.soql).is_valid, "{}/{}", t.id, q.id);
            }
        }
    }

    #[test]
    fn trial_mode_hides_four_query_templates() {
        let config = Config {
            trial_mode: true,
            ..Config::default()
        };
        let lib = TemplateLibrary::builtin(&config).unwrap();
        assert!(lib.available().iter().all(|t| t.query_count == 2));
        assert!(lib.get("customer_health_scorecard").is_err());
        assert_eq!(lib.mode_label(), "Trial Mode");
    }

    #[test]
    fn categories_start_with_all() {
        let lib = TemplateLibrary::builtin(&Config::default()).unwrap();
        assert_eq!(
            lib.categories(),
            vec![
                CategoryInfo {
                    name: "All".to_string(),
                    label: "All Templates".to_string(),
                    count: 4
                },
                CategoryInfo {
                    name: "Sales".to_string(),
                    label: "Sales".to_string(),
                    count: 3
                },
                CategoryInfo {
                    name: "Customer Success".to_string(),
                    label: "Customer Success".to_string(),
                    count: 1
                },
            ]
        );
        assert_eq!(lib.by_category("Customer Success").len(), 1);
    }

    #[test]
    fn filtering_by_category_and_search() {
        let lib = TemplateLibrary::builtin(&Config::default()).unwrap();
        let hits = lib.filter("All", "RISK ASSESSMENT");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "customer_health_scorecard");
        assert_eq!(lib.filter("Sales", "").len(), 3);
        assert!(lib.filter("Sales", "health").is_empty());
        assert_eq!(lib.count_text(hits.len()), "1 of 4 templates");
    }

    #[test]
    fn malformed_templates_are_rejected() {
        let mut lib = TemplateLibrary::builtin(&Config::default()).unwrap();
        let yaml = r#"
templates:
  - id: broken
    name: Broken
    category: Misc
    query_count: 4
    queries:
      - { id: a, index: 1, soql: "SELECT Id FROM Account" }
    processor:
      javascript: "function processData(a, b, c, d) { return {}; }"
"#;
        assert!(matches!(
            lib.add_yaml(yaml),
            Err(Error::MalformedTemplate(id, _)) if id == "broken"
        ));
    }
}
