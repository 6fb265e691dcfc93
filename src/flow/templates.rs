//! Hardcoded order-summary templates filled from conversation data.

use crate::store::model::Conversation;

fn field(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("")
}

/// Replace a recognized template keyword with its expanded body.
///
/// Only an exact match on the whole message text triggers expansion;
/// anything else is returned unchanged.
pub fn populate_customer_template(text: &str, conversation: &Conversation) -> String {
    match text {
        "DETAIL CUSTOMER" => format!(
            "Detail:\n\nNAMA : {}\n\nALAMAT : {}\n\nNO FON : {}",
            field(&conversation.prospect_name),
            field(&conversation.alamat),
            field(&conversation.no_fon),
        ),
        "DETAIL COD" => format!(
            "Detail:\n\nNAMA : {}\n\nALAMAT : {}\n\nNO FONE : {}\n\nPAKEJ : {}\n\n\
             *COD @ POSTAGE FREE*\n\nCARA BAYARAN : COD",
            field(&conversation.prospect_name),
            field(&conversation.alamat),
            field(&conversation.no_fon),
            field(&conversation.pakej),
        ),
        "DETAIL WAGES" => format!(
            "Detail:\n\nNAMA : {}\n\nALAMAT : {}\n\nNO FONE : {}\n\nPAKEJ : {}\n\n\
             *COD @ POSTAGE FREE*\n\nCARA BAYARAN : {}\n\nTARIKH GAJI : {}",
            field(&conversation.prospect_name),
            field(&conversation.alamat),
            field(&conversation.no_fon),
            field(&conversation.pakej),
            field(&conversation.cara_bayaran),
            field(&conversation.tarikh_gaji),
        ),
        "DETAIL CASH" => format!(
            "Detail:\n\nNAMA : {}\n\nALAMAT : {}\n\nNO FONE : {}\n\nPAKEJ : {}\n\n\
             *COD @ POSTAGE FREE*\n\nCARA BAYARAN : Online Transfer",
            field(&conversation.prospect_name),
            field(&conversation.alamat),
            field(&conversation.no_fon),
            field(&conversation.pakej),
        ),
        _ => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation() -> Conversation {
        let mut conv = Conversation::new("dev", "60123456789", "hi");
        conv.prospect_name = Some("Aisyah".to_string());
        conv.alamat = Some("Jalan Merdeka 5".to_string());
        conv.no_fon = Some("60123456789".to_string());
        conv.pakej = Some("Premium".to_string());
        conv.cara_bayaran = Some("Gaji".to_string());
        conv.tarikh_gaji = Some("28hb".to_string());
        conv
    }

    #[test]
    fn detail_customer_expands() {
        let out = populate_customer_template("DETAIL CUSTOMER", &conversation());
        assert_eq!(
            out,
            "Detail:\n\nNAMA : Aisyah\n\nALAMAT : Jalan Merdeka 5\n\nNO FON : 60123456789"
        );
    }

    #[test]
    fn detail_cod_includes_package_and_fixed_payment() {
        let out = populate_customer_template("DETAIL COD", &conversation());
        assert!(out.contains("PAKEJ : Premium"));
        assert!(out.contains("CARA BAYARAN : COD"));
        assert!(out.contains("*COD @ POSTAGE FREE*"));
    }

    #[test]
    fn detail_wages_uses_stored_payment_and_payday() {
        let out = populate_customer_template("DETAIL WAGES", &conversation());
        assert!(out.contains("CARA BAYARAN : Gaji"));
        assert!(out.contains("TARIKH GAJI : 28hb"));
    }

    #[test]
    fn missing_fields_render_empty() {
        let conv = Conversation::new("dev", "601", "hi");
        let out = populate_customer_template("DETAIL CUSTOMER", &conv);
        assert!(out.contains("NAMA : \n"));
    }

    #[test]
    fn non_template_text_passes_through() {
        let out = populate_customer_template("DETAIL CUSTOMER please", &conversation());
        assert_eq!(out, "DETAIL CUSTOMER please");
    }
}
