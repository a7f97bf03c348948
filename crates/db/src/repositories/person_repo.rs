use sqlx::{PgConnection, PgPool};
use statreg_core::reference::Person;
use statreg_core::types::DbId;

use crate::models::ref_id;
use crate::models::unit::PersonRow;

const COLUMNS: &str = "p.id, p.given_name, p.surname, p.middle_name, p.personal_id, p.birth_date, \
    p.sex, p.phone_number, p.address, p.nationality_id, p.role_id";

pub struct PersonRepo;

impl PersonRepo {
    pub async fn list_for_unit(pool: &PgPool, unit_id: DbId) -> Result<Vec<PersonRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM persons p \
             JOIN unit_persons up ON up.person_id = p.id \
             WHERE up.unit_id = $1 \
             ORDER BY p.id"
        );
        sqlx::query_as::<_, PersonRow>(&query)
            .bind(unit_id)
            .fetch_all(pool)
            .await
    }

    /// Lowest-id person matching every identifying field `person` supplies.
    /// A person with no identifying field never matches.
    pub async fn find_matching(pool: &PgPool, person: &Person) -> Result<Option<DbId>, sqlx::Error> {
        if person.given_name.is_none()
            && person.surname.is_none()
            && person.personal_id.is_none()
            && person.birth_date.is_none()
        {
            return Ok(None);
        }
        let row: Option<(DbId,)> = sqlx::query_as(
            "SELECT id FROM persons \
             WHERE ($1::TEXT IS NULL OR given_name = $1) \
               AND ($2::TEXT IS NULL OR surname = $2) \
               AND ($3::TEXT IS NULL OR personal_id = $3) \
               AND ($4::DATE IS NULL OR birth_date = $4) \
             ORDER BY id \
             LIMIT 1",
        )
        .bind(&person.given_name)
        .bind(&person.surname)
        .bind(&person.personal_id)
        .bind(person.birth_date)
        .fetch_optional(pool)
        .await?;
        Ok(row.map(|(id,)| id))
    }

    pub async fn insert(conn: &mut PgConnection, person: &Person) -> Result<DbId, sqlx::Error> {
        let (id,): (DbId,) = sqlx::query_as(
            "INSERT INTO persons \
                 (given_name, surname, middle_name, personal_id, birth_date, sex, \
                  phone_number, address, nationality_id, role_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING id",
        )
        .bind(&person.given_name)
        .bind(&person.surname)
        .bind(&person.middle_name)
        .bind(&person.personal_id)
        .bind(person.birth_date)
        .bind(person.sex)
        .bind(&person.phone_number)
        .bind(&person.address)
        .bind(ref_id(&person.nationality))
        .bind(ref_id(&person.role))
        .fetch_one(conn)
        .await?;
        Ok(id)
    }

    pub async fn update(conn: &mut PgConnection, person: &Person) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE persons \
             SET given_name = $2, surname = $3, middle_name = $4, personal_id = $5, \
                 birth_date = $6, sex = $7, phone_number = $8, address = $9, \
                 nationality_id = $10, role_id = $11 \
             WHERE id = $1",
        )
        .bind(person.id)
        .bind(&person.given_name)
        .bind(&person.surname)
        .bind(&person.middle_name)
        .bind(&person.personal_id)
        .bind(person.birth_date)
        .bind(person.sex)
        .bind(&person.phone_number)
        .bind(&person.address)
        .bind(ref_id(&person.nationality))
        .bind(ref_id(&person.role))
        .execute(conn)
        .await?;
        Ok(())
    }
}
