use rollcall_core::models::{MemberInput, MemberRecord};
use rollcall_core::sync::AddressUpdate;
use rollcall_core::transform::{gender_label, housing_label};

use crate::cli::{MemberCommands, MemberFields};
use crate::commands::common::{
    format_millis, parse_column_assignments, parse_date, parse_key, print_json, Context,
};
use crate::error::CliError;

pub async fn run_member(context: &Context, command: MemberCommands) -> Result<(), CliError> {
    let service = context.relational_service().await?;
    match command {
        MemberCommands::Add { entity_key, fields } => {
            let key = parse_key(&entity_key)?;
            let member = service.create_member(key, member_input(fields)?).await?;
            println!("{}", member.entity_key);
        }
        MemberCommands::Edit {
            entity_key,
            assignments,
        } => {
            let key = parse_key(&entity_key)?;
            let columns = parse_column_assignments(&assignments)?;
            let member = service.update_member(&key, &columns).await?;
            println!("{}", member.entity_key);
        }
        MemberCommands::Address {
            entity_key,
            street,
            postal_code,
            city,
            country,
        } => {
            let key = parse_key(&entity_key)?;
            let address = AddressUpdate {
                street,
                postal_code,
                city,
                country,
            };
            let member = service.update_address(&key, &address).await?;
            println!("{}", member.entity_key);
        }
        MemberCommands::Delete { entity_key } => {
            let key = parse_key(&entity_key)?;
            let member = service.delete_member(&key).await?;
            println!("{}", member.entity_key);
        }
        MemberCommands::Show { entity_key, json } => {
            let member = service.get_member(&parse_key(&entity_key)?).await?;
            if json {
                print_json(&member)?;
            } else {
                for line in format_member_detail(&member) {
                    println!("{line}");
                }
            }
        }
        MemberCommands::List {
            limit,
            include_deleted,
            json,
        } => {
            let members = service.list_members(include_deleted, limit).await?;
            if json {
                print_json(&members)?;
            } else if members.is_empty() {
                println!("No members.");
            } else {
                for member in &members {
                    println!("{}", format_member_line(member));
                }
            }
        }
    }
    Ok(())
}

pub fn member_input(fields: MemberFields) -> Result<MemberInput, CliError> {
    Ok(MemberInput {
        birthday: parse_date(fields.birthday.as_deref())?,
        date_joined: parse_date(fields.date_joined.as_deref())?,
        name: fields.name,
        gender: fields.gender,
        housing_situation: fields.housing,
        email: fields.email,
        phone: fields.phone,
        facebook: fields.facebook,
        street: fields.street,
        postal_code: fields.postal_code,
        city: fields.city,
        country: fields.country,
        reachable: fields.reachable,
        groupable: fields.groupable,
        admin_notes: fields.admin_notes,
    })
}

pub fn format_member_line(member: &MemberRecord) -> String {
    let state = if member.is_deleted() { " [deleted]" } else { "" };
    format!(
        "{}  {}  {}{state}",
        member.entity_key,
        member.name,
        member.city.as_deref().unwrap_or("-")
    )
}

fn format_member_detail(member: &MemberRecord) -> Vec<String> {
    let text = |value: &Option<String>| value.as_deref().unwrap_or("-").to_string();
    vec![
        format!("entity_key:  {}", member.entity_key),
        format!("name:        {}", member.name),
        format!(
            "birthday:    {}",
            member.birthday.map_or_else(|| "-".to_string(), |date| date.to_string())
        ),
        format!("gender:      {}", gender_label(member.gender)),
        format!("housing:     {}", housing_label(member.housing_situation)),
        format!("email:       {}", text(&member.email)),
        format!("phone:       {}", text(&member.phone)),
        format!(
            "address:     {}, {} {}, {}",
            text(&member.street),
            text(&member.postal_code),
            text(&member.city),
            text(&member.country)
        ),
        format!("updated_at:  {}", format_millis(member.updated_at)),
    ]
}
