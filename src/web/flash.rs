use tower_sessions::Session;

use crate::error::SnowcardError;

const FLASH_FLAG_KEY: &str = "flash_flag";

pub(crate) const FLASH_PHOTO_LIMIT: u16 = 1;
pub(crate) const FLASH_NOT_AN_IMAGE: u16 = 2;
pub(crate) const FLASH_NO_PHOTOS: u16 = 3;
pub(crate) const FLASH_STALE_RESULT: u16 = 4;

#[derive(Clone, Debug)]
pub(crate) struct FlashMessage {
    pub(crate) text: &'static str,
    pub(crate) class: &'static str,
}

pub(crate) async fn set_flash(session: &Session, flag: u16) -> Result<(), SnowcardError> {
    session
        .insert(FLASH_FLAG_KEY, flag)
        .await
        .map_err(|err| SnowcardError::InternalServerError(err.to_string()))?;
    Ok(())
}

pub(crate) async fn take_flash_message(
    session: &Session,
) -> Result<Option<FlashMessage>, SnowcardError> {
    let flag = session
        .get::<u16>(FLASH_FLAG_KEY)
        .await
        .map_err(|err| SnowcardError::InternalServerError(err.to_string()))?
        .filter(|flag| *flag != 0);
    if flag.is_some() {
        session
            .insert(FLASH_FLAG_KEY, 0u16)
            .await
            .map_err(|err| SnowcardError::InternalServerError(err.to_string()))?;
    }
    Ok(flag.and_then(message_for))
}

fn message_for(flag: u16) -> Option<FlashMessage> {
    match flag {
        FLASH_PHOTO_LIMIT => Some(FlashMessage {
            text: "Можно загрузить не больше 3 фото.",
            class: "warning",
        }),
        FLASH_NOT_AN_IMAGE => Some(FlashMessage {
            text: "Этот файл не похож на фотографию.",
            class: "warning",
        }),
        FLASH_NO_PHOTOS => Some(FlashMessage {
            text: "Сначала загрузите хотя бы одно фото.",
            class: "warning",
        }),
        FLASH_STALE_RESULT => Some(FlashMessage {
            text: "Студия была очищена, прежний результат отброшен.",
            class: "info",
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_flags_have_no_message() {
        assert!(message_for(0).is_none());
        assert!(message_for(99).is_none());
        assert_eq!(
            message_for(FLASH_PHOTO_LIMIT).map(|m| m.class),
            Some("warning")
        );
    }
}
