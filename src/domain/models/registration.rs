use crate::domain::{
    error::{RegistrationError, RequiredField},
    models::user::NationalId,
};

/// A registration as it arrived on the bus. Every field may be absent until validated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationRequest {
    pub request_id: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub secret: Option<i64>,
    pub national_id: Option<NationalId>,
    pub phone: Option<i64>,
    pub friend_ids: Vec<NationalId>,
}

/// A registration that passed field validation and may be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub secret: i64,
    pub national_id: NationalId,
    pub phone: i64,
    pub friend_ids: Vec<NationalId>,
}

impl RegistrationRequest {
    /// Checks required fields in a fixed order: DNI, name, email, secret, phone.
    pub fn validate(&self) -> Result<NewUser, RegistrationError> {
        let national_id = self
            .national_id
            .ok_or(RegistrationError::MissingField(RequiredField::NationalId))?;
        let name = non_blank(self.name.as_deref())
            .ok_or(RegistrationError::MissingField(RequiredField::Name))?;
        let email = non_blank(self.email.as_deref())
            .ok_or(RegistrationError::MissingField(RequiredField::Email))?;
        let secret = self
            .secret
            .ok_or(RegistrationError::MissingField(RequiredField::Secret))?;
        let phone = self
            .phone
            .ok_or(RegistrationError::MissingField(RequiredField::Phone))?;

        Ok(NewUser {
            name,
            email,
            secret,
            national_id,
            phone,
            friend_ids: self.friend_ids.clone(),
        })
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use rstest::*;

    use super::*;

    #[fixture]
    fn complete() -> RegistrationRequest {
        RegistrationRequest {
            request_id: None,
            name: Some("Juan Perez".to_string()),
            email: Some("juan@example.com".to_string()),
            secret: Some(1234),
            national_id: Some(NationalId::new(12345678)),
            phone: Some(987654321),
            friend_ids: vec![NationalId::new(1)],
        }
    }

    #[rstest]
    fn test_validate_positive(complete: RegistrationRequest) {
        let new_user = complete.validate().unwrap();
        assert_eq!(NationalId::new(12345678), new_user.national_id);
        assert_eq!("Juan Perez", new_user.name);
        assert_eq!(vec![NationalId::new(1)], new_user.friend_ids);
    }

    #[rstest]
    fn test_validate_trims_text_fields(mut complete: RegistrationRequest) {
        complete.email = Some("  juan@example.com ".to_string());
        let new_user = complete.validate().unwrap();
        assert_eq!("juan@example.com", new_user.email);
    }

    #[rstest]
    #[case::national_id(|r: &mut RegistrationRequest| r.national_id = None, RequiredField::NationalId)]
    #[case::name(|r: &mut RegistrationRequest| r.name = None, RequiredField::Name)]
    #[case::blank_name(|r: &mut RegistrationRequest| r.name = Some("   ".to_string()), RequiredField::Name)]
    #[case::email(|r: &mut RegistrationRequest| r.email = None, RequiredField::Email)]
    #[case::blank_email(|r: &mut RegistrationRequest| r.email = Some(String::new()), RequiredField::Email)]
    #[case::secret(|r: &mut RegistrationRequest| r.secret = None, RequiredField::Secret)]
    #[case::phone(|r: &mut RegistrationRequest| r.phone = None, RequiredField::Phone)]
    fn test_validate_missing_field_negative(
        mut complete: RegistrationRequest,
        #[case] strip: fn(&mut RegistrationRequest),
        #[case] expected: RequiredField,
    ) {
        strip(&mut complete);
        match complete.validate() {
            Err(RegistrationError::MissingField(field)) => assert_eq!(expected, field),
            other => panic!("expected missing {expected}, got {other:?}"),
        }
    }

    #[test]
    fn test_national_id_is_checked_first() {
        let empty = RegistrationRequest::default();
        let err = empty.validate().unwrap_err();
        assert_eq!("DNI is required", err.to_string());
    }
}
