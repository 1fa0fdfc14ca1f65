/// Email and SMS bodies for seat-opening notifications
use crate::db::ClassInfo;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmsMessage {
    pub to: String,
    pub body: String,
}

/// Links embedded in messages.
#[derive(Debug, Clone)]
pub struct MessageLinks {
    pub site_url: String,
    pub registration_url: String,
}

impl MessageLinks {
    pub fn new(site_url: &str) -> Self {
        Self {
            site_url: site_url.trim_end_matches('/').to_string(),
            registration_url: "https://phubprod.princeton.edu/psp/phubprod/?cmd=start".to_string(),
        }
    }

    fn course_url(&self, courseid: &str) -> String {
        format!("{}/course?courseid={}&skip", self.site_url, courseid)
    }
}

fn spots(n: u32) -> String {
    if n == 1 {
        "1 spot".to_string()
    } else {
        format!("{n} spots")
    }
}

pub fn render_email(
    to: &str,
    netid: &str,
    info: &ClassInfo,
    n_new_slots: u32,
    unsubscribed: bool,
    links: &MessageLinks,
) -> EmailMessage {
    let subscription = if unsubscribed {
        format!(
            "<p>You have been <b>automatically unsubscribed</b> from this section. If you didn't get the spot, you may re-subscribe here: <a href=\"{}\">TigerSnatch | {}</a>.</p>",
            links.course_url(&info.courseid),
            info.course_displayname
        )
    } else {
        format!(
            "<p>You are <b>still subscribed</b> to this section and will be notified again if more spots open. Manage your subscriptions here: <a href=\"{}\">TigerSnatch | {}</a>.</p>",
            links.course_url(&info.courseid),
            info.course_displayname
        )
    };

    let html = format!(
        "<html>\n<head></head>\n<body style='font-size:1.3em'>\n\
         <p>Dear {netid},</p>\n\
         <p>Your subscribed section <b>{section}</b> in <b>{course}: {title}</b> has {spots} open!</p>\n\
         <p>Head over to <a href=\"{registration}\">TigerHub</a> to Snatch your spot!</p>\n\
         {subscription}\n\
         <p>Best,<br>TigerSnatch Team &lt;3</p>\n\
         </body>\n</html>\n",
        section = info.section_name,
        course = info.course_displayname,
        title = info.course_title,
        spots = spots(n_new_slots),
        registration = links.registration_url,
    );

    EmailMessage {
        to: to.to_string(),
        subject: format!("TigerSnatch: a spot opened in {}", info.short_name()),
        html,
    }
}

/// One-line SMS; `None` when the user has no phone number.
pub fn render_sms(
    phone: Option<&str>,
    info: &ClassInfo,
    n_new_slots: u32,
    unsubscribed: bool,
    links: &MessageLinks,
) -> Option<SmsMessage> {
    let to = phone.filter(|p| !p.trim().is_empty())?;
    let tail = if unsubscribed {
        "You have been unsubscribed from this section."
    } else {
        "You are still subscribed to this section."
    };
    Some(SmsMessage {
        to: to.to_string(),
        body: format!(
            "TigerSnatch: {} open in {}! {} {}",
            spots(n_new_slots),
            info.short_name(),
            tail,
            links.course_url(&info.courseid)
        ),
    })
}
