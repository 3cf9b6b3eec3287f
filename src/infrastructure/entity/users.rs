use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(column_name = "nombre")]
    pub name: String,
    #[sea_orm(column_name = "correo", unique)]
    pub email: String,
    #[sea_orm(column_name = "clave")]
    pub secret: String,
    #[sea_orm(column_name = "dni", unique)]
    pub national_id: i64,
    #[sea_orm(column_name = "telefono")]
    pub phone: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
