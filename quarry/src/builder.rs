//! Query slot and processing script state, with live validation.

use std::time::Instant;

use log::{debug, warn};
use serde::Serialize;

use crate::{
    config::{Config, SlotCount},
    debounce::Debouncer,
    template::TemplateQuery,
    validate::{QueryValidator, RowEstimate, ValidationResult},
    Error,
};

const SAMPLE_QUERIES: [&str; 4] = [
    "SELECT Id, Name, Industry, BillingState, AnnualRevenue, NumberOfEmployees\nFROM Account\nWHERE Industry != null\nLIMIT 100",
    "SELECT Id, Name, Title, AccountId, Account.Name, Account.Industry\nFROM Contact\nWHERE AccountId != null\nLIMIT 200",
    "SELECT Id, Name, Amount, StageName, AccountId, Account.Industry\nFROM Opportunity\nWHERE Amount != null\nLIMIT 150",
    "SELECT Id, Subject, Status, WhoId, WhatId, CreatedDate\nFROM Task\nWHERE CreatedDate = LAST_30_DAYS\nLIMIT 50",
];

const SAMPLE_SCRIPT_TWO: &str = r#"function processData(query1Results, query2Results) {
    var industryOf = {};
    var industryStats = {};
    query1Results.forEach(function (account) {
        var industry = account.Industry || 'Unknown';
        industryOf[account.Id] = industry;
        if (!industryStats[industry]) {
            industryStats[industry] = { accounts: 0, revenue: 0, employees: 0, contacts: 0 };
        }
        industryStats[industry].accounts++;
        industryStats[industry].revenue += account.AnnualRevenue || 0;
        industryStats[industry].employees += account.NumberOfEmployees || 0;
    });
    query2Results.forEach(function (contact) {
        var industry = industryOf[contact.AccountId] || 'Unknown';
        if (!industryStats[industry]) {
            industryStats[industry] = { accounts: 0, revenue: 0, employees: 0, contacts: 0 };
        }
        industryStats[industry].contacts++;
    });
    var industryAnalysis = Object.keys(industryStats).map(function (industry) {
        var s = industryStats[industry];
        return {
            industry: industry,
            accounts: s.accounts,
            contacts: s.contacts,
            totalRevenue: s.revenue,
            avgRevenue: s.accounts > 0 ? s.revenue / s.accounts : 0,
            totalEmployees: s.employees
        };
    });
    return {
        summary: {
            totalAccounts: query1Results.length,
            totalContacts: query2Results.length
        },
        industryAnalysis: industryAnalysis,
        executionTimestamp: new Date().toISOString()
    };
}"#;

const SAMPLE_SCRIPT_FOUR: &str = r#"function processData(query1Results, query2Results, query3Results, query4Results) {
    var industryOf = {};
    var industryStats = {};
    function statsFor(industry) {
        if (!industryStats[industry]) {
            industryStats[industry] = { accounts: 0, revenue: 0, contacts: 0, opportunities: 0, opportunityValue: 0 };
        }
        return industryStats[industry];
    }
    query1Results.forEach(function (account) {
        var industry = account.Industry || 'Unknown';
        industryOf[account.Id] = industry;
        var s = statsFor(industry);
        s.accounts++;
        s.revenue += account.AnnualRevenue || 0;
    });
    query2Results.forEach(function (contact) {
        statsFor(industryOf[contact.AccountId] || 'Unknown').contacts++;
    });
    var totalOpportunityValue = 0;
    query3Results.forEach(function (opp) {
        var s = statsFor(industryOf[opp.AccountId] || 'Unknown');
        s.opportunities++;
        s.opportunityValue += opp.Amount || 0;
        totalOpportunityValue += opp.Amount || 0;
    });
    var completed = query4Results.filter(function (task) { return task.Status === 'Completed'; }).length;
    return {
        summary: {
            totalAccounts: query1Results.length,
            totalContacts: query2Results.length,
            totalOpportunities: query3Results.length,
            totalTasks: query4Results.length,
            totalOpportunityValue: totalOpportunityValue
        },
        industryAnalysis: Object.keys(industryStats).map(function (industry) {
            var s = industryStats[industry];
            return {
                industry: industry,
                accounts: s.accounts,
                contacts: s.contacts,
                opportunities: s.opportunities,
                totalRevenue: s.revenue,
                opportunityValue: s.opportunityValue
            };
        }),
        taskActivity: {
            totalTasks: query4Results.length,
            completedTasks: completed,
            pendingTasks: query4Results.length - completed
        },
        executionTimestamp: new Date().toISOString()
    };
}"#;

/// A field whose validation can be debounced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Query(usize),
    Script,
}

/// The state of one query slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryInput {
    pub id: String,
    pub title: String,
    pub text: String,
    pub char_count: usize,
    pub validation: ValidationResult,
    #[serde(skip)]
    pub estimate: Option<RowEstimate>,
}

impl QueryInput {
    fn new(slot: usize) -> Self {
        Self {
            id: format!("query{}", slot + 1),
            title: format!("SOQL Query {}", slot + 1),
            text: String::new(),
            char_count: 0,
            validation: ValidationResult::valid(),
            estimate: None,
        }
    }

    fn clear(&mut self) {
        self.text.clear();
        self.char_count = 0;
        self.validation = ValidationResult::valid();
        self.estimate = None;
    }

    fn set_text(&mut self, text: &str) {
        self.text = text.to_string();
        self.char_count = text.chars().count();
    }

    fn is_ready(&self) -> bool {
        !self.text.trim().is_empty() && !self.validation.has_errors
    }
}

/// The one-line status shown under each query slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuerySummary {
    Empty,
    Error,
    Ready(Option<RowEstimate>),
}

impl QuerySummary {
    pub fn text(&self) -> String {
        match self {
            Self::Empty => "No query provided".to_string(),
            Self::Error => "Has validation errors".to_string(),
            Self::Ready(Some(RowEstimate::Limit(n))) => format!("Ready (~{} records)", n),
            Self::Ready(_) => "Ready (~unknown records)".to_string(),
        }
    }

    pub fn css_class(&self) -> &'static str {
        match self {
            Self::Empty => "summary-empty",
            Self::Error => "summary-error",
            Self::Ready(_) => "summary-ready",
        }
    }
}

/// A snapshot of the builder for callers outside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuilderState {
    pub queries: Vec<String>,
    pub processing_script: String,
    pub is_valid: bool,
    pub has_valid_queries: bool,
    pub valid_query_count: usize,
    pub has_script: bool,
    pub script_valid: bool,
}

/// The result of applying a template to the builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateOutcome {
    Applied {
        message: String,
        query_count: usize,
        has_processor: bool,
        ui_updated: bool,
    },
    Failed {
        message: String,
        ui_update_failed: bool,
    },
}

impl TemplateOutcome {
    pub fn message(&self) -> String {
        match self {
            Self::Applied {
                message,
                query_count,
                has_processor,
                ..
            } => match (*query_count, *has_processor) {
                (0, _) => message.clone(),
                (n, true) => format!("{} ({} queries + JavaScript processor)", message, n),
                (n, false) => format!("{} ({} queries)", message, n),
            },
            Self::Failed { message, .. } => message.clone(),
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// Owns the query slots and the processing script.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    config: Config,
    validator: QueryValidator,
    inputs: Vec<QueryInput>,
    script: String,
    script_validation: ValidationResult,
    debouncer: Debouncer<Field>,
    executing: bool,
}

impl QueryBuilder {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
            validator: QueryValidator::new(config),
            inputs: (0..config.slot_count.get()).map(QueryInput::new).collect(),
            script: String::new(),
            script_validation: ValidationResult::valid(),
            debouncer: Debouncer::new(config.validation_debounce()),
            executing: false,
        }
    }

    pub fn slot_count(&self) -> SlotCount {
        self.validator.slot_count()
    }

    /// Switch between two and four slots. Every slot and the script are
    /// reset.
    pub fn set_slot_count(&mut self, count: usize) -> Result<(), Error> {
        let slot_count = SlotCount::try_from(count)?;
        *self = Self::new(&self.config.clone().with_slot_count(slot_count));
        debug!("Query builder switched to {}-query mode", slot_count);
        Ok(())
    }

    pub fn inputs(&self) -> &[QueryInput] {
        &self.inputs
    }

    pub fn input(&self, slot: usize) -> Result<&QueryInput, Error> {
        self.inputs.get(slot).ok_or(Error::NoSuchSlot(slot))
    }

    fn input_mut(&mut self, slot: usize) -> Result<&mut QueryInput, Error> {
        self.inputs.get_mut(slot).ok_or(Error::NoSuchSlot(slot))
    }

    pub fn script(&self) -> &str {
        &self.script
    }

    pub fn script_validation(&self) -> &ValidationResult {
        &self.script_validation
    }

    pub fn is_executing(&self) -> bool {
        self.executing
    }

    pub fn set_executing(&mut self, executing: bool) {
        self.executing = executing;
    }

    /// A keystroke in a query slot: store the text and restart that slot's
    /// validation timer.
    pub fn input_query(&mut self, slot: usize, text: &str, now: Instant) -> Result<(), Error> {
        self.input_mut(slot)?.set_text(text);
        self.debouncer.schedule(Field::Query(slot), now);
        Ok(())
    }

    /// A keystroke in the script editor.
    pub fn input_script(&mut self, text: &str, now: Instant) {
        self.script = text.to_string();
        self.debouncer.schedule(Field::Script, now);
    }

    /// Run every validation whose quiet period has elapsed. Returns the
    /// fields that were validated.
    pub fn poll(&mut self, now: Instant) -> Vec<Field> {
        let due = self.debouncer.take_due(now);
        for field in &due {
            match field {
                Field::Query(slot) => self.validate_query(*slot),
                Field::Script => self.validate_script(),
            }
        }
        due
    }

    /// Run every pending validation now, without waiting for its quiet
    /// period to end.
    pub fn flush_validation(&mut self) -> Vec<Field> {
        let pending = self.debouncer.take_all();
        for field in &pending {
            match field {
                Field::Query(slot) => self.validate_query(*slot),
                Field::Script => self.validate_script(),
            }
        }
        pending
    }

    pub fn next_validation_deadline(&self) -> Option<Instant> {
        self.debouncer.next_deadline()
    }

    /// A committed edit of a query slot, validated immediately.
    pub fn change_query(&mut self, slot: usize, text: &str) -> Result<(), Error> {
        self.input_mut(slot)?.set_text(text);
        self.debouncer.cancel(&Field::Query(slot));
        self.validate_query(slot);
        Ok(())
    }

    /// A committed edit of the script, validated immediately.
    pub fn change_script(&mut self, text: &str) {
        self.script = text.to_string();
        self.debouncer.cancel(&Field::Script);
        self.validate_script();
    }

    fn validate_query(&mut self, slot: usize) {
        let validator = &self.validator;
        if let Some(input) = self.inputs.get_mut(slot) {
            input.validation = validator.validate_query(&input.text);
            input.estimate = validator.estimate_rows(&input.text);
        }
    }

    fn validate_script(&mut self) {
        self.script_validation = self.validator.validate_script(&self.script);
    }

    pub fn clear_query(&mut self, slot: usize) -> Result<(), Error> {
        self.input_mut(slot)?.clear();
        self.debouncer.cancel(&Field::Query(slot));
        Ok(())
    }

    pub fn clear_all(&mut self) {
        self.inputs.iter_mut().for_each(QueryInput::clear);
        self.script.clear();
        self.script_validation = ValidationResult::valid();
        self.debouncer.cancel_all();
        debug!("All query data cleared");
    }

    pub fn load_sample_query(&mut self, slot: usize) -> Result<(), Error> {
        let sample = SAMPLE_QUERIES.get(slot).copied().unwrap_or_default();
        self.change_query(slot, sample)
    }

    pub fn load_sample_script(&mut self) {
        let sample = match self.slot_count() {
            SlotCount::Two => SAMPLE_SCRIPT_TWO,
            SlotCount::Four => SAMPLE_SCRIPT_FOUR,
        };
        self.change_script(sample);
    }

    pub fn summary(&self, slot: usize) -> Result<QuerySummary, Error> {
        let input = self.input(slot)?;
        Ok(if input.text.trim().is_empty() {
            QuerySummary::Empty
        } else if input.validation.has_errors {
            QuerySummary::Error
        } else {
            QuerySummary::Ready(input.estimate)
        })
    }

    /// Whether the current queries and script may be executed.
    ///
    /// Every non-blank query must be valid, since all of them are sent to
    /// the backend.
    pub fn can_execute(&self) -> bool {
        !self.executing
            && !self.script.trim().is_empty()
            && !self.script_validation.has_errors
            && self.inputs.iter().any(QueryInput::is_ready)
            && self
                .inputs
                .iter()
                .all(|i| i.text.trim().is_empty() || !i.validation.has_errors)
    }

    /// The non-blank queries, trimmed, in slot order.
    pub fn executable_queries(&self) -> Vec<String> {
        self.inputs
            .iter()
            .map(|i| i.text.trim())
            .filter(|q| !q.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn state(&self) -> BuilderState {
        let valid_query_count = self.inputs.iter().filter(|i| i.is_ready()).count();
        BuilderState {
            queries: self.inputs.iter().map(|i| i.text.clone()).collect(),
            processing_script: self.script.clone(),
            is_valid: self.can_execute(),
            has_valid_queries: valid_query_count > 0,
            valid_query_count,
            has_script: !self.script.trim().is_empty(),
            script_valid: !self.script_validation.has_errors,
        }
    }

    /// Replace the builder's contents with a template's queries and script.
    ///
    /// Queries fill the slots in order; queries beyond the slot count are
    /// ignored and slots without a query are left empty. Both validators are
    /// re-run.
    pub fn apply_template(&mut self, queries: &[TemplateQuery], processor_script: &str) -> TemplateOutcome {
        if processor_script.trim().is_empty() {
            return TemplateOutcome::Failed {
                message: "Failed to apply template: Processor script parameter must be a string"
                    .to_string(),
                ui_update_failed: false,
            };
        }
        self.clear_all();

        for slot in 0..self.inputs.len() {
            if let Some(q) = queries.get(slot).filter(|q| !q.soql.is_empty()) {
                self.inputs[slot].set_text(&q.soql);
                self.validate_query(slot);
            }
        }
        self.script = processor_script.to_string();
        self.validate_script();

        let mismatched = self
            .inputs
            .iter()
            .zip(queries.iter())
            .any(|(input, q)| input.text != q.soql)
            || self.script != processor_script;
        if mismatched {
            warn!("Template data did not land in the query builder as expected");
            return TemplateOutcome::Failed {
                message: "Template data updated but UI failed to refresh".to_string(),
                ui_update_failed: true,
            };
        }

        TemplateOutcome::Applied {
            message: "Template loaded successfully".to_string(),
            query_count: queries.iter().filter(|q| !q.soql.is_empty()).count(),
            has_processor: true,
            ui_updated: true,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    fn builder() -> QueryBuilder {
        QueryBuilder::new(&Config::default())
    }

    fn template_query(index: usize, soql: &str) -> TemplateQuery {
        TemplateQuery {
            id: format!("q{}", index),
            index,
            description: String::new(),
            soql: soql.to_string(),
        }
    }

    #[test]
    fn typing_is_validated_after_the_quiet_period() {
        let start = Instant::now();
        let mut b = builder();
        b.input_query(0, "DELETE FROM Account", start).unwrap();
        assert_eq!(b.input(0).unwrap().char_count, 19);
        assert!(b.input(0).unwrap().validation.is_valid);
        assert!(b.poll(start + Duration::from_millis(499)).is_empty());
        assert_eq!(
            b.poll(start + Duration::from_millis(500)),
            vec![Field::Query(0)]
        );
        assert!(b.input(0).unwrap().validation.has_errors);
        assert_eq!(b.summary(0).unwrap(), QuerySummary::Error);
    }

    #[test]
    fn unknown_slots_are_rejected() {
        let mut b = builder();
        assert!(matches!(b.change_query(2, "x"), Err(Error::NoSuchSlot(2))));
        assert!(matches!(b.set_slot_count(3), Err(Error::InvalidSlotCount(3))));
    }

    #[test]
    fn slot_count_switch_resets_everything() {
        let mut b = builder();
        b.load_sample_script();
        b.set_slot_count(4).unwrap();
        assert_eq!(b.inputs().len(), 4);
        assert_eq!(b.script(), "");
        assert_eq!(b.inputs()[3].id, "query4");
    }

    #[test]
    fn samples_are_valid_for_their_mode() {
        for count in [2, 4] {
            let mut b = builder();
            b.set_slot_count(count).unwrap();
            for slot in 0..count {
                b.load_sample_query(slot).unwrap();
            }
            b.load_sample_script();
            assert!(b.script_validation().is_valid, "{:?}", b.script_validation());
            assert!(b.can_execute());
            assert_eq!(
                b.summary(0).unwrap().text(),
                "Ready (~100 records)"
            );
        }
    }

    #[test]
    fn execution_requires_script_and_a_ready_query() {
        let mut b = builder();
        assert!(!b.can_execute());
        b.change_query(1, "SELECT Id FROM Contact").unwrap();
        assert!(!b.can_execute());
        b.change_script("function processData(a, b) { return {}; }");
        assert!(b.can_execute());
        b.set_executing(true);
        assert!(!b.can_execute());
        b.set_executing(false);
        assert_eq!(b.executable_queries(), vec!["SELECT Id FROM Contact"]);
        let state = b.state();
        assert_eq!(state.valid_query_count, 1);
        assert!(state.is_valid && state.has_script && state.script_valid);
        assert_eq!(b.summary(0).unwrap().text(), "No query provided");
        assert_eq!(b.summary(1).unwrap().text(), "Ready (~unknown records)");
    }

    #[test]
    fn applying_a_template() {
        let mut b = builder();
        b.change_query(1, "SELECT Id FROM Lead").unwrap();
        let outcome = b.apply_template(
            &[
                template_query(1, "SELECT Id FROM Account LIMIT 10"),
                template_query(2, ""),
                template_query(3, "SELECT Id FROM Case"),
            ],
            "function processData(a, b) { return {}; }",
        );
        assert_eq!(
            outcome,
            TemplateOutcome::Applied {
                message: "Template loaded successfully".to_string(),
                query_count: 2,
                has_processor: true,
                ui_updated: true,
            }
        );
        assert_eq!(
            outcome.message(),
            "Template loaded successfully (2 queries + JavaScript processor)"
        );
        assert_eq!(b.inputs()[0].text, "SELECT Id FROM Account LIMIT 10");
        assert_eq!(b.inputs()[1].text, "");
        assert!(b.can_execute());
    }

    #[test]
    fn template_without_processor_fails() {
        let mut b = builder();
        b.change_query(0, "SELECT Id FROM Account").unwrap();
        let outcome = b.apply_template(&[template_query(1, "SELECT Id FROM Lead")], "  ");
        assert!(!outcome.is_applied());
        assert_eq!(b.inputs()[0].text, "SELECT Id FROM Account");
    }

    #[test]
    fn an_invalid_query_blocks_execution_even_beside_a_valid_one() {
        let mut b = builder();
        b.change_query(0, "SELECT Id FROM Account").unwrap();
        b.change_script("function processData(a, b) { return {}; }");
        assert!(b.can_execute());
        b.change_query(1, "DELETE FROM Account").unwrap();
        assert!(!b.can_execute());
        b.clear_query(1).unwrap();
        assert!(b.can_execute());
    }

    #[test]
    fn flushing_runs_pending_validations_early() {
        let start = Instant::now();
        let mut b = builder();
        b.change_query(0, "SELECT Id FROM Account").unwrap();
        b.change_script("function processData(a, b) { return {}; }");
        b.input_query(0, "UPDATE Account", start).unwrap();
        assert!(b.can_execute());
        assert_eq!(b.flush_validation(), vec![Field::Query(0)]);
        assert!(!b.can_execute());
        assert_eq!(b.next_validation_deadline(), None);
    }
}

