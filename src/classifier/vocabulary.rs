//! Curated word lists for the rule-based classification steps

/// Denylisted terms, matched as whole words on lowercased text.
/// Longer compounds come first so they win over their components.
pub const PROFANITY_TERMS: &[&str] = &[
    "개새끼",
    "미친놈",
    "미친년",
    "씨발",
    "시발",
    "씨팔",
    "병신",
    "지랄",
    "닥쳐",
    "꺼져",
    "좆",
    "asshole",
    "fucking",
    "fuck",
    "shit",
    "bitch",
    "idiot",
    "stupid",
    "ass",
];

/// Particles, endings and insult nouns that may trail a denylisted term
/// without making it part of a longer word. Up to two may stack
/// (놈 + 아, 하네 + 요). "새끼" is only an insult in these compounds.
pub const PROFANITY_SUFFIXES: &[&str] = &[
    "새끼", "하네요", "같은", "같이", "같네", "하네", "하지", "들아", "놈아", "들", "아", "야", "이",
    "은", "는", "을", "를", "가", "도", "라", "요", "놈", "년", "s",
];

/// Product and support vocabulary; any hit is a technical question.
/// Korean terms match as substrings since particles attach directly.
pub const DOMAIN_TERMS_KO: &[&str] = &[
    "포스",
    "프린터",
    "키오스크",
    "영수증",
    "바코드",
    "스캐너",
    "단말기",
    "카드리더",
    "재설치",
    "설치",
    "백업",
    "복구",
    "업데이트",
    "견적서",
    "데이터베이스",
    "정산",
    "매출",
    "영업일보",
    "소프트웨어",
    "하드웨어",
    "네트워크",
    "오류",
    "에러",
];

/// ASCII vocabulary, matched on ASCII word boundaries so `pos` does not fire
/// inside `possible`
pub const DOMAIN_TERMS_ASCII: &[&str] = &[
    "pos", "db", "qr", "kiosk", "printer", "usb", "lan", "wifi", "vpn", "error", "backup",
];

/// Tokens never worth indexing or matching on
pub const STOPWORDS: &[&str] = &[
    "어떻게", "해요", "돼요", "있어요", "하나요", "했어요", "안돼요", "안되요", "되나요", "이", "가", "을",
    "를", "의", "에", "에서", "로", "으로", "와", "과", "도", "만", "은", "는", "그", "저", "어떤",
    "무엇", "뭐", "왜", "언제", "어디서", "잘", "못", "안", "해결", "알려", "주세요", "알려주세요",
    "요청", "문의", "좀", "요", "아니", "그게", "아니라", "한데", "다른", "안녕하세요", "안녕", "하세요",
    "세요", "도움이", "필요하신가요", "필요해요", "필요합니다", "필요", "그러면", "그럼", "그래서",
    "그리고", "또한", "또는", "하지만", "그런데", "방법", "방법이", "어떻게요", "하는", "하고", "있나요",
    "the", "a", "an", "is", "to", "how", "do", "i", "my", "please",
];

/// Korean particles stripped from the end of a token before indexing,
/// longest first
pub const TRAILING_PARTICLES: &[&str] = &[
    "에서는", "으로는", "에서", "으로", "까지", "부터", "에게", "한테", "하고", "이나", "은", "는", "이",
    "가", "을", "를", "의", "에", "로", "와", "과", "도", "만", "랑",
];
