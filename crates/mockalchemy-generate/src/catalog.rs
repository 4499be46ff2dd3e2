use fake::Fake;
use fake::faker::address::en::{CityName, CountryName, StateName, StreetName, ZipCode};
use fake::faker::company::en::{Buzzword, CompanyName, Industry};
use fake::faker::currency::en::CurrencyCode;
use fake::faker::internet::en::{DomainSuffix, IPv4, SafeEmail, Username};
use fake::faker::job::en::Title as JobTitle;
use fake::faker::lorem::en::{Paragraph, Sentence, Word};
use fake::faker::name::en::{FirstName, LastName, Name, Title as NameTitle};
use fake::faker::phone_number::en::PhoneNumber;
use rand::RngCore;

/// Template ids accepted by `faker` schema nodes.
pub const TEMPLATE_IDS: &[&str] = &[
    "address.city",
    "address.country",
    "address.state",
    "address.street",
    "address.zip",
    "company.buzzword",
    "company.industry",
    "company.name",
    "currency.code",
    "internet.domain_suffix",
    "internet.email",
    "internet.ipv4",
    "internet.username",
    "job.title",
    "lorem.paragraph",
    "lorem.sentence",
    "lorem.word",
    "name.first_name",
    "name.last_name",
    "name.name",
    "name.title",
    "phone.number",
];

pub fn has_template(id: &str) -> bool {
    TEMPLATE_IDS.contains(&id)
}

/// Render one value for a catalog template.
pub fn generate_template(id: &str, rng: &mut dyn RngCore) -> Option<String> {
    let value: String = match id {
        "address.city" => CityName().fake_with_rng(rng),
        "address.country" => CountryName().fake_with_rng(rng),
        "address.state" => StateName().fake_with_rng(rng),
        "address.street" => StreetName().fake_with_rng(rng),
        "address.zip" => ZipCode().fake_with_rng(rng),
        "company.buzzword" => Buzzword().fake_with_rng(rng),
        "company.industry" => Industry().fake_with_rng(rng),
        "company.name" => CompanyName().fake_with_rng(rng),
        "currency.code" => CurrencyCode().fake_with_rng(rng),
        "internet.domain_suffix" => DomainSuffix().fake_with_rng(rng),
        "internet.email" => SafeEmail().fake_with_rng(rng),
        "internet.ipv4" => IPv4().fake_with_rng(rng),
        "internet.username" => Username().fake_with_rng(rng),
        "job.title" => JobTitle().fake_with_rng(rng),
        "lorem.paragraph" => Paragraph(2..4).fake_with_rng(rng),
        "lorem.sentence" => Sentence(4..10).fake_with_rng(rng),
        "lorem.word" => Word().fake_with_rng(rng),
        "name.first_name" => FirstName().fake_with_rng(rng),
        "name.last_name" => LastName().fake_with_rng(rng),
        "name.name" => Name().fake_with_rng(rng),
        "name.title" => NameTitle().fake_with_rng(rng),
        "phone.number" => PhoneNumber().fake_with_rng(rng),
        _ => return None,
    };
    Some(value)
}

/// Catalog template inferred from a plain string field's name.
pub fn template_for_field(field: &str) -> Option<&'static str> {
    let name = field.to_lowercase();
    let template = if name.contains("email") {
        "internet.email"
    } else if name.contains("username") || name == "login" || name == "handle" {
        "internet.username"
    } else if name == "firstname" || name == "first_name" {
        "name.first_name"
    } else if name == "lastname" || name == "last_name" {
        "name.last_name"
    } else if name.contains("company") {
        "company.name"
    } else if name.contains("name") {
        "name.name"
    } else if name.contains("city") {
        "address.city"
    } else if name.contains("country") {
        "address.country"
    } else if name.contains("street") || name.contains("address") {
        "address.street"
    } else if name.contains("zip") || name.contains("postal") {
        "address.zip"
    } else if name.contains("phone") {
        "phone.number"
    } else if name.contains("currency") {
        "currency.code"
    } else if name.contains("description") || name.contains("bio") || name.contains("summary") {
        "lorem.sentence"
    } else if name.contains("title") {
        "job.title"
    } else {
        return None;
    };
    Some(template)
}
