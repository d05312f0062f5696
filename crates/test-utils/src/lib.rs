//! Roster test utilities.
//!
//! Row fixtures shaped like the `to_jsonb` rows the listing queries
//! return, for loading into an in-memory row source.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{Value, json};
use uuid::Uuid;

/// A fixed timestamp `days` after 2024-01-01, so tests are deterministic.
pub fn day(days: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
        + chrono::Duration::days(days)
}

/// Timestamps are stored the way PostgreSQL renders them in JSON.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Create an organization row.
pub fn organization(id: &str, name: &str) -> TestOrganization {
    TestOrganization {
        id: id.to_string(),
        uri: name.to_lowercase().replace(' ', "-"),
        name: name.to_string(),
        active: true,
        created_at: day(0),
        city: None,
        kind: None,
        tags: Vec::new(),
        packages: Vec::new(),
    }
}

#[derive(Debug, Clone)]
pub struct TestOrganization {
    pub id: String,
    pub uri: String,
    pub name: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub city: Option<String>,
    pub kind: Option<String>,
    pub tags: Vec<String>,
    pub packages: Vec<(String, Option<DateTime<Utc>>)>,
}

impl TestOrganization {
    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_city(mut self, city: &str) -> Self {
        self.city = Some(city.to_string());
        self
    }

    pub fn with_type(mut self, kind: &str) -> Self {
        self.kind = Some(kind.to_string());
        self
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tags.push(tag.to_string());
        self
    }

    /// Add a package; `None` never expires.
    pub fn with_package(mut self, kind: &str, valid_until: Option<DateTime<Utc>>) -> Self {
        self.packages.push((kind.to_string(), valid_until));
        self
    }

    pub fn build(self) -> Value {
        let packages: Vec<Value> = self
            .packages
            .iter()
            .map(|(kind, valid_until)| {
                json!({
                    "id": Uuid::now_v7().to_string(),
                    "organization_id": self.id,
                    "type": kind,
                    "valid_until": valid_until.map(timestamp),
                })
            })
            .collect();

        json!({
            "id": self.id,
            "uri": self.uri,
            "name": self.name,
            "active": self.active,
            "created_at": timestamp(self.created_at),
            "address": { "city": self.city, "country": "BE" },
            "meta": { "type": self.kind, "tags": self.tags },
            "packages": packages,
        })
    }
}

/// Create a member row.
pub fn member(id: &str, organization_id: &str, first_name: &str, last_name: &str) -> TestMember {
    TestMember {
        id: id.to_string(),
        organization_id: organization_id.to_string(),
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
        email: None,
        birth_day: None,
        created_at: day(0),
        phone: None,
        parent_emails: Vec::new(),
        registrations: Vec::new(),
    }
}

#[derive(Debug, Clone)]
pub struct TestMember {
    pub id: String,
    pub organization_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub birth_day: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub phone: Option<String>,
    pub parent_emails: Vec<String>,
    pub registrations: Vec<(String, String)>,
}

impl TestMember {
    pub fn with_email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }

    pub fn with_birth_day(mut self, birth_day: DateTime<Utc>) -> Self {
        self.birth_day = Some(birth_day);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_phone(mut self, phone: &str) -> Self {
        self.phone = Some(phone.to_string());
        self
    }

    /// Add a parent reachable at `email`.
    pub fn with_parent_email(mut self, email: &str) -> Self {
        self.parent_emails.push(email.to_string());
        self
    }

    /// Register the member in `group_id` for `period_id`.
    pub fn with_registration(mut self, group_id: &str, period_id: &str) -> Self {
        self.registrations
            .push((group_id.to_string(), period_id.to_string()));
        self
    }

    pub fn build(self) -> Value {
        let registrations: Vec<Value> = self
            .registrations
            .iter()
            .map(|(group_id, period_id)| {
                json!({
                    "id": Uuid::now_v7().to_string(),
                    "member_id": self.id,
                    "group_id": group_id,
                    "period_id": period_id,
                    "registered_at": timestamp(self.created_at),
                })
            })
            .collect();

        json!({
            "id": self.id,
            "organization_id": self.organization_id,
            "first_name": self.first_name,
            "last_name": self.last_name,
            "email": self.email,
            "birth_day": self.birth_day.map(timestamp),
            "created_at": timestamp(self.created_at),
            "details": {
                "phone": self.phone,
                "requiresFinancialSupport": false,
                "parents": self.parent_emails.iter().map(|email| json!({ "email": email })).collect::<Vec<_>>(),
            },
            "registrations": registrations,
        })
    }
}

/// Create a payment row.
pub fn payment(id: &str, organization_id: &str, price: i64) -> TestPayment {
    TestPayment {
        id: id.to_string(),
        organization_id: organization_id.to_string(),
        status: "Created".to_string(),
        method: None,
        price,
        paid_at: None,
        created_at: day(0),
        balance_items: Vec::new(),
    }
}

#[derive(Debug, Clone)]
pub struct TestPayment {
    pub id: String,
    pub organization_id: String,
    pub status: String,
    pub method: Option<String>,
    pub price: i64,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub balance_items: Vec<(String, i64)>,
}

impl TestPayment {
    /// Mark as paid with `method` at `paid_at`.
    pub fn paid(mut self, method: &str, paid_at: DateTime<Utc>) -> Self {
        self.status = "Succeeded".to_string();
        self.method = Some(method.to_string());
        self.paid_at = Some(paid_at);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_balance_item(mut self, description: &str, price: i64) -> Self {
        self.balance_items.push((description.to_string(), price));
        self
    }

    pub fn build(self) -> Value {
        let balance_items: Vec<Value> = self
            .balance_items
            .iter()
            .map(|(description, price)| {
                json!({
                    "id": Uuid::now_v7().to_string(),
                    "payment_id": self.id,
                    "description": description,
                    "price": price,
                    "status": "Due",
                })
            })
            .collect();

        json!({
            "id": self.id,
            "organization_id": self.organization_id,
            "status": self.status,
            "method": self.method,
            "price": self.price,
            "paid_at": self.paid_at.map(timestamp),
            "created_at": timestamp(self.created_at),
            "balance_items": balance_items,
        })
    }
}
